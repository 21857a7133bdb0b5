use std::sync::Arc;

use tokio::sync::broadcast;

use crate::event::Event;

/// Default number of events a slow receiver can fall behind before it
/// starts losing the oldest ones.
pub const BUFFER_SIZE: usize = 1000;

/// Output side of the pipeline: every decoded event is broadcast to all
/// receivers (transport, sinks, tests).
#[derive(Clone)]
pub struct Bus {
    sender: broadcast::Sender<Arc<Event>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish `event` and return how many receivers will see it. Events
    /// sent while nobody listens are dropped.
    pub fn send(&self, event: Event) -> usize {
        log::trace!(target: &format!("event::{}", event.header.name), "{event}");
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn get_receiver(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bpf_common::parsing::Context;

    use super::*;
    use crate::event::{Header, IdtHook, Payload};

    fn event(index: u64) -> Event {
        let header = Header {
            id: 1201,
            name: "anti_rkt_idt_scan".into(),
            exe: "kestrel".to_string(),
            context: Context::default(),
        };
        Event::new(
            header,
            Payload::IdtHook(IdtHook {
                index,
                address: "0".to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn every_receiver_gets_every_event() {
        let bus = Bus::with_capacity(4);
        assert_eq!(bus.send(event(0)), 0);

        let mut first = bus.get_receiver();
        let mut second = bus.get_receiver();
        assert_eq!(bus.receiver_count(), 2);
        assert_eq!(bus.send(event(1)), 2);
        for rx in [&mut first, &mut second] {
            match rx.recv().await.unwrap().payload() {
                Payload::IdtHook(hook) => assert_eq!(hook.index, 1),
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }
}
