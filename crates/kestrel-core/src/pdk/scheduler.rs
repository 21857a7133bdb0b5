use std::{str::FromStr, time::Duration};

use bpf_common::time::Timestamp;
use chrono::Utc;
use cron::Schedule;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};

use super::{EventFactory, Registry, TriggerContext, TriggerError};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("invalid schedule {expression:?} for {name}: {reason}")]
    InvalidSchedule {
        name: &'static str,
        expression: &'static str,
        reason: String,
    },
}

struct ScheduledScan {
    name: &'static str,
    expression: &'static str,
    schedule: Schedule,
    factory: EventFactory,
}

/// Runs the triggers of every registered active scanner on its schedule.
pub struct Scheduler {
    scans: Vec<ScheduledScan>,
    ctx: TriggerContext,
}

impl Scheduler {
    /// Collect the scanners of `registry`. Fails on the first invalid
    /// cron expression.
    pub fn new(registry: &Registry, ctx: TriggerContext) -> Result<Self, SchedulerError> {
        let mut scans = Vec::new();
        for entry in registry.iter() {
            let prototype = entry.create();
            let Some(scanner) = prototype.as_active_scanner() else {
                continue;
            };
            let expression = scanner.schedule();
            let schedule =
                Schedule::from_str(expression).map_err(|err| SchedulerError::InvalidSchedule {
                    name: entry.name,
                    expression,
                    reason: err.to_string(),
                })?;
            scans.push(ScheduledScan {
                name: entry.name,
                expression,
                schedule,
                factory: entry.create_fn(),
            });
        }
        Ok(Self { scans, ctx })
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    /// Spawn one timer task per scanner. Tasks end when `stop` fires.
    pub fn spawn(self, stop: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.scans
            .into_iter()
            .map(|scan| {
                let ctx = self.ctx.clone();
                let stop = stop.clone();
                tokio::spawn(run_scan(scan, ctx, stop))
            })
            .collect()
    }
}

async fn run_scan(scan: ScheduledScan, ctx: TriggerContext, mut stop: watch::Receiver<bool>) {
    log::debug!("scheduling {} on {:?}", scan.name, scan.expression);
    loop {
        let Some(next) = scan.schedule.upcoming(Utc).next() else {
            log::debug!("no more runs for {}", scan.name);
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let factory = scan.factory;
        let ctx = ctx.clone();
        match tokio::task::spawn_blocking(move || run_trigger(factory, &ctx)).await {
            Ok(Ok(())) => log::debug!("{} triggered at {}", scan.name, Timestamp::now()),
            Ok(Err(err)) => log::warn!("{} trigger failed: {err}", scan.name),
            Err(err) => log::warn!("{} trigger panicked: {err}", scan.name),
        }
    }
}

/// Run the trigger of a single event kind, if it has one.
pub fn run_trigger(factory: EventFactory, ctx: &TriggerContext) -> Result<(), TriggerError> {
    let event = factory();
    match event.as_active_scanner() {
        Some(scanner) => scanner.trigger(ctx),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use bpf_common::{Probe, parsing::RawDecoder};

    use super::*;
    use crate::{
        cache::KernelSymbols,
        event::{IdtHook, Payload},
        pdk::{ActiveScanner, DecodeState, EventError, KernelEvent, Verdict},
    };

    static TRIGGERED: AtomicUsize = AtomicUsize::new(0);

    macro_rules! scanner {
        ($name:ident, $id:expr, $schedule:expr) => {
            #[derive(Default)]
            struct $name;

            impl KernelEvent for $name {
                fn id(&self) -> u32 {
                    $id
                }

                fn name(&self) -> &'static str {
                    stringify!($name)
                }

                fn decode(
                    &mut self,
                    _decoder: &mut RawDecoder,
                    _state: &DecodeState,
                ) -> Result<Verdict, EventError> {
                    Ok(Verdict::Emit)
                }

                fn probes(&self) -> Vec<Probe> {
                    Vec::new()
                }

                fn into_payload(self: Box<Self>) -> Payload {
                    Payload::IdtHook(IdtHook::default())
                }

                fn as_active_scanner(&self) -> Option<&dyn ActiveScanner> {
                    Some(self)
                }
            }

            impl ActiveScanner for $name {
                fn schedule(&self) -> &'static str {
                    $schedule
                }

                fn trigger(&self, ctx: &TriggerContext) -> Result<(), TriggerError> {
                    ctx.ksyms
                        .lookup_name("idt_table")
                        .ok_or_else(|| TriggerError::SymbolNotFound("idt_table".to_string()))?;
                    TRIGGERED.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };
    }

    scanner!(EverySecond, 1, "* * * * * *");
    scanner!(Broken, 2, "every ten minutes");

    fn ctx(kallsyms: &str) -> TriggerContext {
        TriggerContext {
            ksyms: Arc::new(KernelSymbols::from_reader(kallsyms.as_bytes()).unwrap()),
        }
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        let mut registry = Registry::new();
        registry.register::<Broken>().unwrap();
        assert!(matches!(
            Scheduler::new(&registry, ctx("")),
            Err(SchedulerError::InvalidSchedule { name: "Broken", .. })
        ));
    }

    #[test]
    fn missing_symbol_fails_trigger() {
        let mut registry = Registry::new();
        registry.register::<EverySecond>().unwrap();
        let factory = registry.get(1).unwrap().create_fn();
        assert!(matches!(
            run_trigger(factory, &ctx("")),
            Err(TriggerError::SymbolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn triggers_run_until_stopped() {
        let mut registry = Registry::new();
        registry.register::<EverySecond>().unwrap();
        let scheduler = Scheduler::new(&registry, ctx("ffffffff82000000 D idt_table\n")).unwrap();
        assert_eq!(scheduler.len(), 1);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handles = scheduler.spawn(stop_rx);
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            while TRIGGERED.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        assert!(result.is_ok());

        stop_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
