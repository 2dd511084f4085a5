//! Scenario S6 — move-only transfer: sending a payload with no `Copy`/`Clone` moves it
//! into the handler; the sending site has nothing left to reuse. The absence of a
//! `Clone`/`Copy` impl on `Payload` below is what makes this a compile-time guarantee
//! rather than a runtime check — reusing `payload` after `handle.send(payload)` would
//! fail to build.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use active_object::{create, ActiveObject, Context, Handles};

struct Payload {
    tag: String,
}

struct Receiver {
    log: Arc<Mutex<Option<String>>>,
}

impl ActiveObject for Receiver {}

impl Handles<Payload> for Receiver {
    fn handle(&mut self, msg: Payload, _ctx: &mut Context<'_, Self>) {
        *self.log.lock().unwrap() = Some(msg.tag);
    }
}

#[test]
fn move_only_payload_arrives_intact() {
    let log = Arc::new(Mutex::new(None));
    let handle = create(Receiver { log: log.clone() }).unwrap();

    let payload = Payload {
        tag: "unique".to_string(),
    };
    handle.send(payload).unwrap();
    // `payload` was moved by the line above; it cannot be referenced again here.

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(*log.lock().unwrap(), Some("unique".to_string()));
    handle.stop();
}
