//! Queue-Pumps
//!
//! Ein Pump wartet auf der Queue (ohne Busy-Loop), holt genau ein Element pro
//! Aufwachen ab und uebergibt es an den Handler. Beendet wird er ueber ein
//! explizites Shutdown-Signal oder wenn alle Sender geschlossen sind.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Laufender Pump-Task
pub struct Pump {
    name: &'static str,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<u64>>,
}

impl Pump {
    /// Startet einen Pump auf der aktuellen Tokio-Runtime
    pub fn spawn<T, F, Fut>(name: &'static str, mut rx: mpsc::UnboundedReceiver<T>, mut handler: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut delivered = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        debug!(pump = name, "Shutdown-Signal empfangen");
                        break;
                    }
                    item = rx.recv() => match item {
                        Some(item) => {
                            handler(item).await;
                            delivered += 1;
                            trace!(pump = name, delivered, "Element uebergeben");
                        }
                        None => {
                            debug!(pump = name, "Queue geschlossen");
                            break;
                        }
                    }
                }
            }
            delivered
        });

        Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signalisiert das Ende ohne zu warten
    pub fn signal_shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stoppt den Pump und wartet auf das Ende.
    /// Gibt die Anzahl uebergebener Elemente zurueck.
    pub async fn stop(mut self) -> u64 {
        self.signal_shutdown();
        match self.task.take() {
            Some(task) => task.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn pump_liefert_in_reihenfolge() {
        let (tx, rx) = mpsc::unbounded_channel();
        let ziel = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let z = Arc::clone(&ziel);
        let pump = Pump::spawn("test", rx, move |x: u32| {
            let z = Arc::clone(&z);
            async move { z.lock().push(x) }
        });

        for i in 0..5 {
            tx.send(i).unwrap();
        }
        drop(tx);

        // Queue geschlossen -> Pump endet nach dem letzten Element
        let geliefert = pump.stop().await;
        assert!(geliefert <= 5);
        let erhalten = ziel.lock().clone();
        assert_eq!(erhalten, (0..geliefert as u32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn pump_leert_queue_ohne_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let _pump = Pump::spawn("test", rx, move |x: u32| {
            let done_tx = done_tx.clone();
            async move {
                let _ = done_tx.send(x);
            }
        });

        tx.send(7).unwrap();
        tx.send(8).unwrap();
        assert_eq!(done_rx.recv().await, Some(7));
        assert_eq!(done_rx.recv().await, Some(8));
    }

    #[tokio::test]
    async fn shutdown_weckt_wartenden_pump() {
        let (_tx, rx) = mpsc::unbounded_channel::<u32>();
        let pump = Pump::spawn("test", rx, |_| async {});
        // Queue bleibt offen und leer, trotzdem muss stop zurueckkehren
        assert_eq!(pump.stop().await, 0);
    }
}
