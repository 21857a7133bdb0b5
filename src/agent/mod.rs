//! Startup and shutdown of the decoding pipeline.
//!
//! Kernel symbols are loaded first, then the pipeline and the scan
//! scheduler are built around the shared state. Every record source gets its
//! own reader task; a single watch channel stops readers and scans.

use std::sync::Arc;

use anyhow::{Context, Result};
use bpf_common::RecordSource;
use futures_util::future::join_all;
use kestrel_core::{
    bus::Bus,
    cache::{ArgvCache, KernelSymbols},
    event::Event,
    pdk::{
        DecodeState, Dispatcher, Registry, Scheduler, StatsSnapshot, TriggerContext,
        receive_from_broadcast,
    },
};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::{broadcast, watch},
    task::JoinHandle,
};

use crate::cli::RunOpts;

mod config;
mod replay;

pub use config::{AgentSettings, GENERAL_CONFIG, KestrelConfig, OutputFormat};
pub use replay::{MAX_RECORD_SIZE, ReplaySource, write_record};

pub async fn run(options: &RunOpts, registry: Registry) -> Result<()> {
    log::trace!("Kestrel options: {:?}", options);

    let config = if let Some(custom_file) = &options.config {
        KestrelConfig::with_custom_file(custom_file)?
    } else {
        KestrelConfig::new()?
    };
    let settings = AgentSettings::from_config(&config)?;
    let output = settings.output;

    let mut agent = Agent::start(settings, registry).await?;
    let sink = spawn_sink(agent.subscribe(), output);

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_hup = signal(SignalKind::hangup())?;

    match &options.replay {
        Some(path) => {
            let source = ReplaySource::open(path).await?;
            agent.add_source(source);
            tokio::select! {
                _ = agent.wait_sources() => log::info!("Replay of {} completed", path.display()),
                _ = sig_int.recv() => log::trace!("SIGINT received"),
                _ = sig_term.recv() => log::trace!("SIGTERM received"),
                _ = sig_hup.recv() => log::trace!("SIGHUP received"),
            }
        }
        None => {
            log::info!("No record source, running the periodic scans only");
            tokio::select! {
                _ = sig_int.recv() => log::trace!("SIGINT received"),
                _ = sig_term.recv() => log::trace!("SIGTERM received"),
                _ = sig_hup.recv() => log::trace!("SIGHUP received"),
            }
        }
    }

    log::info!("Terminating Kestrel...");
    let stats = agent.shutdown().await;
    log::info!("{stats}");

    if let Err(err) = sink.await {
        log::warn!("event sink terminated abnormally: {err}");
    }
    Ok(())
}

/// A running pipeline.
pub struct Agent {
    dispatcher: Dispatcher,
    stop: watch::Sender<bool>,
    readers: Vec<JoinHandle<()>>,
    scans: Vec<JoinHandle<()>>,
}

impl Agent {
    /// Load the kernel symbols and start the scheduled scans, if enabled.
    pub async fn start(settings: AgentSettings, registry: Registry) -> Result<Self> {
        let kallsyms_path = settings.kallsyms_path.clone();
        let ksyms = tokio::task::spawn_blocking(move || KernelSymbols::load(&kallsyms_path))
            .await
            .context("Kernel symbols loader terminated abnormally")?
            .with_context(|| {
                format!(
                    "Error loading kernel symbols from {}",
                    settings.kallsyms_path.display()
                )
            })?;
        log::debug!("{} kernel symbols loaded", ksyms.len());
        Self::with_symbols(settings, registry, Arc::new(ksyms))
    }

    pub fn with_symbols(
        settings: AgentSettings,
        registry: Registry,
        ksyms: Arc<KernelSymbols>,
    ) -> Result<Self> {
        let state = DecodeState::new(
            ArgvCache::new(settings.argv_cache),
            ksyms.clone(),
            settings.window_filters(),
        );
        let bus = Bus::with_capacity(settings.bus_capacity);
        let (stop, stop_rx) = watch::channel(false);

        let scans = if settings.scheduler_enabled {
            let scheduler = Scheduler::new(&registry, TriggerContext { ksyms })?;
            log::info!("Scheduling {} active scans", scheduler.len());
            scheduler.spawn(stop_rx)
        } else {
            log::info!("Active scans disabled");
            Vec::new()
        };

        log::info!("Decoding {} event types", registry.len());
        let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(state), bus);
        Ok(Self {
            dispatcher,
            stop,
            readers: Vec::new(),
            scans,
        })
    }

    /// Receiver of every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.dispatcher.bus().get_receiver()
    }

    /// Start draining `source` on its own task.
    pub fn add_source<S: RecordSource>(&mut self, source: S) {
        let handle = self.dispatcher.spawn_reader(source, self.stop.subscribe());
        self.readers.push(handle);
    }

    /// Wait until every source added so far is exhausted. Dropping the
    /// returned future leaves the readers running until [`Agent::shutdown`].
    pub async fn wait_sources(&mut self) {
        for result in join_all(self.readers.drain(..)).await {
            if let Err(err) = result {
                log::warn!("record reader terminated abnormally: {err}");
            }
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop readers and scans and wait for them. In-flight records are
    /// completed. Closes the bus once every task is gone.
    pub async fn shutdown(self) -> StatsSnapshot {
        let _ = self.stop.send(true);
        for result in join_all(self.readers.into_iter().chain(self.scans)).await {
            if let Err(err) = result {
                log::warn!("pipeline task terminated abnormally: {err}");
            }
        }
        self.dispatcher.stats().snapshot()
    }
}

/// Print every event on stdout until the bus is closed.
pub fn spawn_sink(mut rx: broadcast::Receiver<Arc<Event>>, output: OutputFormat) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receive_from_broadcast(&mut rx, "kestrel::sink").await {
            match output {
                OutputFormat::Json => match serde_json::to_string(event.as_ref()) {
                    Ok(line) => println!("{line}"),
                    Err(err) => log::warn!("error serializing {}: {err}", event.header().name),
                },
                OutputFormat::Plain => println!("{event}"),
            }
        }
    })
}
