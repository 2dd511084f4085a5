//! Scenario S5 — stale callback: a token minted by an object outlives the object;
//! invoking it after the object is gone returns normally, never calls the handler, and
//! never panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use active_object::{create, ActiveObject, Callback, Context, Handles};

struct X {
    called: Arc<AtomicBool>,
}

impl ActiveObject for X {}

impl Handles<mpsc::Sender<Callback<X, i32>>> for X {
    fn handle(&mut self, reply: mpsc::Sender<Callback<X, i32>>, ctx: &mut Context<'_, Self>) {
        let _ = reply.send(ctx.callback::<i32>());
    }
}

impl Handles<i32> for X {
    fn handle(&mut self, _msg: i32, _ctx: &mut Context<'_, Self>) {
        self.called.store(true, Ordering::SeqCst);
    }
}

#[test]
fn invoking_a_token_after_its_object_is_gone_is_a_silent_no_op() {
    let called = Arc::new(AtomicBool::new(false));
    let handle = create(X {
        called: called.clone(),
    })
    .unwrap();

    let (tx, rx) = mpsc::channel();
    handle.send(tx).unwrap();
    let token = rx.recv_timeout(Duration::from_secs(1)).unwrap();

    drop(handle);
    thread::sleep(Duration::from_millis(100));

    token.invoke(42);
    thread::sleep(Duration::from_millis(100));

    assert!(!called.load(Ordering::SeqCst));
}
