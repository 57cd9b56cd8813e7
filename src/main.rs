use anyhow::{Context, Result};
use clap::Parser;
use classroom_coach::{
    audio::{AudioCapture, AudioCaptureConfig, CpalPlayback, PlaybackConfig},
    coach::{CoachSession, CoachState},
    config::{load_config, LiveConfig, DEFAULT_MODEL, GEMINI_LIVE_URL},
    prompts::DemoConversation,
    response::{OutlineEnforcer, TextResponseValidator},
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Live model to talk to
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// WebSocket endpoint of the live API
    #[arg(long, default_value = GEMINI_LIVE_URL)]
    endpoint: String,

    /// Input device name (default device when omitted)
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name (default device when omitted)
    #[arg(long)]
    output_device: Option<String>,

    /// Keep the microphone open instead of push-to-talk
    #[arg(long)]
    always_on: bool,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the demo conversation and exit
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_devices {
        return list_devices();
    }
    if args.demo {
        print_demo();
        return Ok(());
    }

    let api_config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            eprintln!("   Please set it with: export GEMINI_API_KEY=your_key_here");
            std::process::exit(1);
        }
    };

    let live_config = LiveConfig::default()
        .with_endpoint(&args.endpoint)
        .context("Invalid --endpoint")?
        .with_model(args.model.clone());

    let capture_config = AudioCaptureConfig {
        device_name: args.input_device.clone(),
        ..Default::default()
    };
    let playback = Arc::new(CpalPlayback::new(PlaybackConfig {
        device_name: args.output_device.clone(),
        ..Default::default()
    }));

    let session = CoachSession::new(
        live_config,
        api_config,
        capture_config,
        playback,
        Arc::new(OutlineEnforcer),
    )
    .context("Failed to create coach session")?;
    log::info!("🎓 Classroom coach initialized (model: {})", args.model);

    tokio::spawn(print_state_changes(session.subscribe()));
    session.connect();

    if args.always_on {
        session
            .set_always_on(true)
            .await
            .context("Failed to open the microphone")?;
        println!("🎤 Always-on mode. Press Ctrl+C to exit");
    } else {
        println!("🎤 Press Enter to start talking, Enter again to send. Type q to quit");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("🛑 Ctrl+C received");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                if line.trim().eq_ignore_ascii_case("q") {
                    break;
                }
                if args.always_on {
                    continue;
                }

                if session.is_talking() {
                    session.stop_push_to_talk().await;
                } else if let Err(e) = session.start_push_to_talk().await {
                    println!("❌ Could not start the microphone: {}", e);
                }
            }
        }
    }

    session.disconnect().await;
    println!("👋 Bye");
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = AudioCapture::list_devices().context("Failed to enumerate input devices")?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        println!(
            "{} {} ({} channels)",
            if device.is_default { "*" } else { " " },
            device.name,
            device.channel_count
        );
    }
    Ok(())
}

fn print_demo() {
    let validator = OutlineEnforcer;
    println!("👩‍🏫 Teacher: {}\n", DemoConversation::teacher_prompt());
    println!("🎓 Coach:\n{}", validator.enforce(DemoConversation::coach_response()));
}

async fn print_state_changes(mut state: watch::Receiver<CoachState>) {
    let mut last = CoachState::default();
    while state.changed().await.is_ok() {
        let current = state.borrow_and_update().clone();
        if current.status != last.status {
            println!("📡 {}", current.status);
        }
        if current.last_response_text != last.last_response_text
            && !current.last_response_text.is_empty()
        {
            println!("\n{}\n", current.last_response_text);
        }
        last = current;
    }
}
