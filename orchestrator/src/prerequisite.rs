/*
 * Copyright 2024 Oxide Computer Company
 */

/*
 * A run cannot begin until the G-code it will submit has been produced.  The
 * producer signals once, through a single-use channel, how it finished.
 */

use helio_common::CancelCheck;
use tokio::sync::oneshot;

use super::state::StateCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    /**
     * The G-code has been written.
     */
    Finished,
    /**
     * Nothing needed doing; the G-code from an earlier pass is current.
     */
    Idle,
    Canceled,
}

pub struct PrerequisiteSender(oneshot::Sender<Upstream>);

impl PrerequisiteSender {
    /**
     * Deliver the signal.  Sending to a run that has already gone away is
     * not an error.
     */
    pub fn send(self, u: Upstream) {
        self.0.send(u).ok();
    }
}

pub struct Prerequisite(oneshot::Receiver<Upstream>);

impl Prerequisite {
    /**
     * A prerequisite that is already satisfied.
     */
    pub fn ready() -> Prerequisite {
        let (tx, rx) = prerequisite();
        tx.send(Upstream::Finished);
        rx
    }

    /**
     * Wait for the signal.  Returns true if the run should proceed.  A
     * dropped sender counts as cancellation, and so does a stop of the run
     * while we wait.
     */
    pub(crate) async fn wait(self, state: &StateCell) -> bool {
        if state.was_canceled() {
            return false;
        }

        tokio::select! {
            res = self.0 => match res {
                Ok(Upstream::Finished) | Ok(Upstream::Idle) => {
                    !state.was_canceled()
                }
                Ok(Upstream::Canceled) | Err(_) => false,
            },
            _ = state.stopped() => false,
        }
    }
}

pub fn prerequisite() -> (PrerequisiteSender, Prerequisite) {
    let (tx, rx) = oneshot::channel();
    (PrerequisiteSender(tx), Prerequisite(rx))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn started() -> Arc<StateCell> {
        let s = Arc::new(StateCell::default());
        s.launch().unwrap();
        s
    }

    #[tokio::test]
    async fn signals() {
        let s = started();

        let (tx, rx) = prerequisite();
        tx.send(Upstream::Idle);
        assert!(rx.wait(&s).await);

        assert!(Prerequisite::ready().wait(&s).await);

        let (tx, rx) = prerequisite();
        tx.send(Upstream::Canceled);
        assert!(!rx.wait(&s).await);

        let (tx, rx) = prerequisite();
        drop(tx);
        assert!(!rx.wait(&s).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_waiting() {
        let s = started();
        let (_tx, rx) = prerequisite();

        let s0 = Arc::clone(&s);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            s0.cancel();
        });

        let start = tokio::time::Instant::now();
        assert!(!rx.wait(&s).await);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn stale_wakeups_are_ignored() {
        let s = started();
        s.cancel();
        s.reset().unwrap();
        s.launch().unwrap();

        /*
         * The stop from the previous run must not end this wait.
         */
        let (tx, rx) = prerequisite();
        let t = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(Upstream::Finished);
        });
        assert!(rx.wait(&s).await);
        t.await.unwrap();
    }
}
