//! Solace application binary - composition root.
//!
//! Ties the Solace crates together into a single executable:
//! 1. Load configuration from TOML
//! 2. Open the SQLite conversation store
//! 3. Build the chat session controller over the offline
//!    `ReflectiveResponder` backend
//! 4. Rehydrate the conversation and start the event render loop
//! 5. Run a line-oriented chat loop on stdin (or, with `--voice`, one
//!    simulated voice turn through the full loop)

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use solace_core::config::{SolaceConfig, VoiceConfig};
use solace_core::events::SessionEvent;
use solace_core::types::{ChatMode, Role};
use solace_session::{ChatSessionController, InferenceService, ReflectiveResponder};
use solace_store::{ConversationStore, Database};
use solace_voice::{
    MockCaptureDevice, MockSynthesizer, MockTranscriptionService, VoiceController,
};

mod cli;

use cli::CliArgs;

/// Print session events as they arrive: streamed chunks inline,
/// whole assistant messages (guest replies, notices) on finalize,
/// suggestions as a trailing hint line.
async fn render_loop(
    controller: Arc<ChatSessionController>,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::AssistantChunk { text, .. }) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            Ok(SessionEvent::MessageFinalized { .. }) => {
                println!();
            }
            Ok(SessionEvent::MessageAppended { id, role, .. }) if role == Role::Assistant => {
                // Streamed replies arrive as chunks; print only the
                // messages that land whole.
                if let Ok(state) = controller.snapshot() {
                    if let Some(message) = state.message(id) {
                        if !message.is_loading {
                            println!("{}", message.content);
                        }
                    }
                }
            }
            Ok(SessionEvent::SuggestionsUpdated { suggestions, .. }) => {
                println!("  try: {}", suggestions.join(" | "));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Renderer lagged behind session events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Run one simulated voice turn: mock microphone energy drives the
/// VAD, the scripted transcript goes through the chat session, and the
/// streamed reply comes back out through the speech handoff.
async fn voice_demo(
    controller: Arc<ChatSessionController>,
    voice_config: &VoiceConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let transcriber = MockTranscriptionService::scripted(vec![Ok(
        "i've been sleeping badly this week".to_string(),
    )]);
    let synthesizer = MockSynthesizer::new();
    let (turn_tx, mut turn_rx) = mpsc::channel(4);
    let voice = Arc::new(VoiceController::new(
        MockCaptureDevice::new(),
        transcriber,
        synthesizer.clone(),
        voice_config,
        turn_tx,
    ));

    // Two-phase wiring: the chat controller gets the handoff, the
    // voice controller gets the receiving end.
    let (handoff, responses) = voice.handoff_pair();
    controller.set_speech_handoff(handoff)?;
    let speaker = Arc::clone(&voice);
    let speech_loop = tokio::spawn(async move { speaker.run_speech_loop(responses).await });

    voice.start_session().await?;
    println!("voice session: listening (simulated microphone)");

    // A short utterance, then enough silence to end the turn.
    for _ in 0..6 {
        voice.process_level(-18.0).await;
    }
    for _ in 0..30 {
        voice.process_level(-52.0).await;
    }

    if let Some(turn) = turn_rx.recv().await {
        println!("heard: {}", turn.transcript);
        controller.send(turn.transcript).await?;
    }

    // Let the speech loop drain the handed-off reply.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for line in synthesizer.spoken() {
        println!("spoke: {}", line);
    }

    voice.end_session().await;
    controller.clear_speech_handoff()?;
    speech_loop.await?;
    println!("voice session ended");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config first; its log level feeds the subscriber below.
    let config_file = args.resolve_config_path();
    let mut config = SolaceConfig::load_or_default(&config_file);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if args.voice {
        // Voice sessions ask the backend for shorter replies.
        config.chat.mode = ChatMode::Voice;
    }

    // Tracing. RUST_LOG wins, then CLI flag > SOLACE_LOG > config.
    let log_level = args
        .resolve_log_level()
        .unwrap_or_else(|| config.general.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    tracing::info!("Starting Solace v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage. The data dir is normalized in the config once, so the
    // database path is derived in exactly one place.
    config.general.data_dir = cli::expand_home(&config.general.data_dir)
        .display()
        .to_string();
    let db_path = config.db_path();
    let db = Arc::new(Database::open(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    let store = Arc::new(ConversationStore::new(db));

    if args.list {
        for summary in store.list_conversations()? {
            println!(
                "{}  {}  ({} unread)  {}",
                summary.updated_at.format("%Y-%m-%d %H:%M"),
                summary.id,
                summary.unread_count,
                summary.title
            );
        }
        return Ok(());
    }

    // Offline backend; swap in a remote InferenceService here when one
    // is configured.
    let backend: Arc<dyn InferenceService> = Arc::new(ReflectiveResponder::new());

    let user_id = if args.guest {
        None
    } else {
        Some("local".to_string())
    };
    let controller = Arc::new(ChatSessionController::new(
        Arc::clone(&store),
        backend,
        config.chat.clone(),
        user_id,
    ));

    let restored = controller.rehydrate()?;
    if restored > 0 {
        println!("(restored {} messages)", restored);
    }

    let events = controller.subscribe();
    let render_controller = Arc::clone(&controller);
    tokio::spawn(async move {
        render_loop(render_controller, events).await;
    });

    if args.voice {
        return voice_demo(controller, &config.voice).await;
    }

    println!("Solace is listening. Type a message, or /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        match line.as_str() {
            "" => continue,
            "/quit" | "/q" => break,
            "/help" => {
                println!("/clear  wipe this conversation");
                println!("/retry  regenerate the last reply");
                println!("/list   show all conversations");
                println!("/quit   exit");
            }
            "/clear" => match controller.clear_conversation() {
                Ok(()) => println!("(conversation cleared)"),
                Err(e) => tracing::error!(error = %e, "Clear failed"),
            },
            "/retry" => {
                if let Err(e) = controller.retry().await {
                    tracing::error!(error = %e, "Retry failed");
                }
            }
            "/list" => match controller.list_conversations() {
                Ok(summaries) => {
                    for summary in summaries {
                        println!(
                            "{}  ({} unread)  {}",
                            summary.id, summary.unread_count, summary.title
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "List failed"),
            },
            _ => {
                if let Err(e) = controller.send(line).await {
                    tracing::warn!(error = %e, "Send rejected");
                }
            }
        }
    }

    Ok(())
}
