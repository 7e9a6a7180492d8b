//! Device Agent - AI-powered Android automation
//!
//! This is the CLI entry point for the device-agent tool.
//! Run with: cargo run --bin device-agent -- [--list-devices | --connect <addr>] [task]

use device_agent::actions::{ConsoleConfirmation, NoOverlay};
use device_agent::adb::{AdbConnection, ConnectionType};
use device_agent::config::{get_messages, Messages};
use device_agent::{
    ActionDispatcher, AdbDevice, AgentEvent, AgentWorker, AppSettings, CaptureConfig,
    CaptureEngine, DeviceAgent, DeviceSession, DispatcherConfig, HistorySink, JsonlHistorySink,
    LoopState, ModelClient, NullHistorySink, WorkerHandle,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let settings = apply_env_overrides(AppSettings::load());
    let msgs = get_messages(&settings.lang);

    if args.iter().any(|arg| arg == "--list-devices") {
        return list_devices(msgs).await;
    }

    let mut task_args = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--connect" {
            let Some(address) = iter.next() else {
                anyhow::bail!("--connect needs an address, e.g. --connect 192.168.1.20:5555");
            };
            match AdbConnection::new().connect(&address).await {
                Ok(output) => println!("✅ {}: {}", msgs.connection_successful, output),
                Err(e) => {
                    eprintln!("❌ {}: {}", msgs.connection_failed, e);
                    return Ok(());
                }
            }
        } else {
            task_args.push(arg);
        }
    }

    println!("🤖 Device Agent - AI-powered Android Automation");
    println!("================================================");
    println!("Model: {} @ {}", settings.model_name, settings.base_url);
    println!("Language: {}", settings.lang);
    println!(
        "Retry: max {} attempts, {}s delay",
        settings.max_retries, settings.retry_delay
    );
    if let Some(id) = settings.device() {
        println!("Device: {}", id);
    }
    if let Some(display) = settings.display_id {
        println!("Display: {}", display);
    }
    println!("================================================\n");

    let handle = build_worker(&settings, msgs);

    if !task_args.is_empty() {
        let task = task_args.join(" ");
        run_task(&handle, &task, msgs).await?;
    } else {
        // Interactive mode
        println!("Interactive mode. Type your task and press Enter.");
        println!("Press Ctrl-C to cancel a running task.");
        println!("Type 'quit' or 'exit' to exit.\n");

        let stdin = io::stdin();
        loop {
            print!("📝 Task: ");
            io::stdout().flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let task = line.trim();

            if task.is_empty() {
                continue;
            }

            if task == "quit" || task == "exit" {
                println!("Goodbye! 👋");
                break;
            }

            run_task(&handle, task, msgs).await?;
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Override persisted settings from the environment.
fn apply_env_overrides(mut settings: AppSettings) -> AppSettings {
    fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
        env::var(key).ok().and_then(|s| s.trim().parse().ok())
    }

    if let Ok(v) = env::var("MODEL_BASE_URL") {
        settings.base_url = v;
    }
    if let Ok(v) = env::var("MODEL_API_KEY") {
        settings.api_key = v;
    }
    if let Ok(v) = env::var("MODEL_NAME") {
        settings.model_name = v;
    }
    if let Ok(v) = env::var("ADB_DEVICE_ID") {
        settings.device_id = v;
    }
    if let Ok(v) = env::var("AGENT_LANG") {
        settings.lang = v;
    }
    if let Some(v) = parsed("MODEL_MAX_RETRIES") {
        settings.max_retries = v;
    }
    if let Some(v) = parsed("MODEL_RETRY_DELAY") {
        settings.retry_delay = v;
    }
    if let Some(v) = parsed("AGENT_MAX_STEPS") {
        settings.max_steps = v;
    }
    if let Some(v) = parsed("AGENT_MAX_PARSE_FAILURES") {
        settings.max_parse_failures = v;
    }
    if let Some(v) = parsed("ADB_DISPLAY_ID") {
        settings.display_id = Some(v);
    }
    settings
}

async fn list_devices(msgs: &Messages) -> anyhow::Result<()> {
    let devices = AdbConnection::new().list_devices().await?;
    if devices.is_empty() {
        println!("{}", msgs.no_devices);
        return Ok(());
    }
    for device in devices {
        let kind = match device.connection_type {
            ConnectionType::Usb => "usb",
            ConnectionType::Wifi => "wifi",
            ConnectionType::Remote => "remote",
            ConnectionType::Emulator => "emulator",
        };
        println!(
            "{:<24} {:<14} {:<9} {}",
            device.device_id,
            device.status,
            kind,
            device.model.unwrap_or_default()
        );
    }
    Ok(())
}

fn build_worker(settings: &AppSettings, msgs: &'static Messages) -> WorkerHandle {
    let mut device = AdbDevice::new(settings.device());
    if let Some(display) = settings.display_id {
        device = device.with_display(display);
    }
    let session = DeviceSession::new(Arc::new(device), Arc::new(NoOverlay));

    let history: Arc<dyn HistorySink> = match JsonlHistorySink::default_dir() {
        Some(dir) if settings.record_history => match JsonlHistorySink::create_in(&dir) {
            Ok(sink) => {
                println!("History: {}", sink.path().display());
                Arc::new(sink.with_images(settings.record_images))
            }
            Err(e) => {
                tracing::warn!("history disabled: {}", e);
                Arc::new(NullHistorySink)
            }
        },
        _ => Arc::new(NullHistorySink),
    };

    let model = Arc::new(ModelClient::new(settings.model_config()));
    let dispatcher = ActionDispatcher::new(&session, DispatcherConfig::default())
        .with_confirmation(Arc::new(ConsoleConfirmation::new(&settings.lang)))
        .with_history(history.clone());

    let agent = DeviceAgent::new(&session, model, settings.agent_config())
        .with_capture(CaptureEngine::new(&session, CaptureConfig::default()))
        .with_dispatcher(dispatcher)
        .with_history(history)
        .with_progress_callback(move |event| print_event(event, msgs));

    AgentWorker::spawn(Arc::new(agent))
}

async fn run_task(handle: &WorkerHandle, task: &str, msgs: &Messages) -> anyhow::Result<()> {
    let pending = handle.submit(task).await?;
    let wait = pending.wait();
    tokio::pin!(wait);

    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            _ = tokio::signal::ctrl_c() => {
                println!("\n⏹️ {}", msgs.task_cancelled);
                handle.cancel();
            }
        }
    };

    match result {
        Ok(result) => println!("\n📋 {}: {}\n", msgs.final_result, result.message),
        Err(e) => eprintln!("\n❌ Error: {}\n", e),
    }
    Ok(())
}

fn print_event(event: &AgentEvent, msgs: &Messages) {
    match event {
        AgentEvent::TaskStarted { goal, .. } => {
            println!("📝 {}: {}\n", msgs.starting_task, goal);
        }
        AgentEvent::StepRecorded { step, .. } => {
            println!("{}", "=".repeat(50));
            println!("{} {}", msgs.step, step.number);
            if !step.thinking.is_empty() {
                println!("💭 {}:", msgs.thinking);
                println!("{}", step.thinking);
                println!("{}", "-".repeat(50));
            }
            println!("🎯 {}: {}", msgs.action, step.description);
            let mark = if step.success { "✅" } else { "⚠️" };
            println!(
                "{} {}: {}",
                mark,
                msgs.result,
                step.message.as_deref().unwrap_or("")
            );
            println!("{}\n", "=".repeat(50));
        }
        AgentEvent::StateChanged(_) => {}
        AgentEvent::TaskFinished(result) => {
            let label = match result.state {
                LoopState::Completed => format!("🎉 {}", msgs.task_completed),
                LoopState::Cancelled => format!("⏹️ {}", msgs.task_cancelled),
                _ => format!("❌ {}", msgs.task_failed),
            };
            println!("{} ({} {})", label, result.steps().len(), msgs.step);
        }
    }
}
