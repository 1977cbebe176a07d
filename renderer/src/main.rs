//! Render a module's specification into code.
//!
//! The render runs on a worker thread. This thread attaches to the event bus
//! and prints state changes and log lines until the worker finishes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use renderer::context::Collaborators;
use renderer::core::frid::{Frid, FridRange};
use renderer::driver::RenderStatus;
use renderer::events::{CancelToken, EventBus, EventSink, RenderEvent};
use renderer::exit_codes;
use renderer::io::config::{DEFAULT_CONFIG_FILE, RenderConfig, load_config};
use renderer::io::http_service::HttpGenerationService;
use renderer::io::run_state::RunState;
use renderer::io::scripts::ProcessScriptRunner;
use renderer::io::spec_tree::SpecTree;
use renderer::logging;
use renderer::render::render_module;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(
    name = "renderer",
    version,
    about = "Render a specification's functional requirements into code"
)]
struct Cli {
    /// Specification outline (JSON).
    spec: PathBuf,

    /// Render configuration (TOML). A missing file means defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[arg(long)]
    build_folder: Option<PathBuf>,
    /// Seed of a fresh build folder.
    #[arg(long)]
    base_folder: Option<PathBuf>,
    /// Copy of the build folder written after a successful render.
    #[arg(long)]
    build_dest: Option<PathBuf>,
    #[arg(long)]
    conformance_tests_folder: Option<PathBuf>,
    #[arg(long)]
    conformance_tests_dest: Option<PathBuf>,

    #[arg(long)]
    unittests_script: Option<PathBuf>,
    #[arg(long)]
    conformance_tests_script: Option<PathBuf>,
    #[arg(long)]
    prepare_environment_script: Option<PathBuf>,

    /// Render only `A` or `A,B` (inclusive).
    #[arg(long, conflicts_with = "render_from")]
    render_range: Option<FridRange>,
    /// Resume at this functional requirement and render to the end.
    #[arg(long)]
    render_from: Option<Frid>,
    /// Reuse the id of an earlier render.
    #[arg(long)]
    replay_with: Option<String>,

    /// Generation service URL.
    #[arg(long)]
    api: Option<String>,
    #[arg(long, env = "CODEPLAIN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Debug logging unless `RUST_LOG` says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut RenderConfig) {
        let paths = [
            (&self.build_folder, &mut cfg.build_folder),
            (&self.conformance_tests_folder, &mut cfg.conformance_tests_folder),
        ];
        for (flag, field) in paths {
            if let Some(value) = flag {
                *field = value.clone();
            }
        }
        let optional_paths = [
            (&self.base_folder, &mut cfg.base_folder),
            (&self.build_dest, &mut cfg.build_dest),
            (&self.conformance_tests_dest, &mut cfg.conformance_tests_dest),
            (&self.unittests_script, &mut cfg.unittests_script),
            (&self.conformance_tests_script, &mut cfg.conformance_tests_script),
            (&self.prepare_environment_script, &mut cfg.prepare_environment_script),
        ];
        for (flag, field) in optional_paths {
            if flag.is_some() {
                field.clone_from(flag);
            }
        }
        if let Some(url) = &self.api {
            cfg.service.url.clone_from(url);
        }
        if self.api_key.is_some() {
            cfg.service.api_key.clone_from(&self.api_key);
        }
    }

    fn range(&self) -> Option<FridRange> {
        self.render_range
            .clone()
            .or_else(|| self.render_from.clone().map(FridRange::from_start))
    }
}

fn main() {
    match run(Cli::parse()) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = load_config(&cli.config)?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid render configuration")?;

    let spec = SpecTree::load(&cli.spec)?;
    let service = HttpGenerationService::new(&config.service)?;
    let scripts = ProcessScriptRunner {
        output_limit_bytes: config.script_output_limit_bytes,
    };

    let bus = Arc::new(EventBus::new());
    let sink: Arc<dyn EventSink> = bus.clone();
    logging::init(Some(sink.clone()), cli.verbose)?;

    let range = cli.range();
    let run_state = RunState::new(cli.replay_with.clone());
    let worker = thread::Builder::new()
        .name("render".to_string())
        .spawn(move || {
            let collaborators = Collaborators {
                spec: Box::new(spec),
                service: Box::new(service),
                scripts: Box::new(scripts),
            };
            render_module(config, range, run_state, collaborators, sink, CancelToken::new())
        })
        .context("spawn render thread")?;

    let events = bus.attach()?;
    print_until_finished(&events, &worker);

    let report = worker
        .join()
        .map_err(|_| anyhow!("render thread panicked"))?;
    match report {
        Ok(report) if report.status == RenderStatus::Completed => Ok(exit_codes::OK),
        Ok(_) => Ok(exit_codes::FAILED),
        Err(err) => {
            eprintln!("{:#}", err);
            Ok(exit_codes::FAILED)
        }
    }
}

fn print_until_finished<T>(events: &Receiver<RenderEvent>, worker: &thread::JoinHandle<T>) {
    loop {
        match events.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => print_event(&event),
            Err(RecvTimeoutError::Timeout) if !worker.is_finished() => {}
            Err(_) => break,
        }
    }
    for event in events.try_iter() {
        print_event(&event);
    }
}

fn print_event(event: &RenderEvent) {
    match event {
        RenderEvent::RenderModuleStarted { module_name } => {
            println!("Rendering module {module_name}");
        }
        RenderEvent::RenderStateUpdated { state, .. } => println!("-> {state}"),
        RenderEvent::RenderModuleCompleted { module_name } => {
            println!("Module {module_name} finished");
        }
        RenderEvent::RenderCompleted { render_id } => {
            println!("Render {render_id} completed");
        }
        RenderEvent::RenderFailed { message } => eprintln!("Render failed:\n{message}"),
        RenderEvent::LogMessageEmitted {
            logger,
            level,
            message,
            timestamp,
        } => eprintln!("{timestamp} {level:>5} {logger}: {message}"),
    }
}
