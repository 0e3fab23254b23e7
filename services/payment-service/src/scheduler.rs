use crate::domain::registration::Registration;
use crate::repositories::registration_repo::{RegistrationStore, SWEEP_BATCH_LIMIT};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Hasil satu putaran sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Background sweeper untuk attempt prepare yang tidak pernah di-complete
pub struct ExpirySweeper {
    store: Arc<dyn RegistrationStore>,
    interval: Duration,
}

/// Handle untuk menghentikan sweeper yang sedang jalan
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn RegistrationStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Satu putaran: prepared yang sudah lewat expires_at jadi failed, registration balik ke pending.
    ///
    /// Batch diambil ulang selama hasilnya penuh. Gagal di satu record hanya di-log,
    /// record lain tetap diproses.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        loop {
            let batch = match self.store.find_expired_prepared(now).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(error = %e, "❌ Failed to load expired payments");
                    report.failed += 1;
                    return report;
                }
            };

            let full_batch = batch.len() >= SWEEP_BATCH_LIMIT as usize;
            let expired_before = report.expired;
            report.scanned += batch.len();

            for registration in batch {
                self.expire(&registration, now, &mut report).await;
            }

            // Batch penuh tanpa progress berarti record yang sama akan terbaca lagi
            if !full_batch || report.expired == expired_before {
                break;
            }
        }

        report
    }

    async fn expire(&self, registration: &Registration, now: DateTime<Utc>, report: &mut SweepReport) {
        // Tanpa prepare id tidak ada attempt yang bisa di-expire
        let Some(prepare_id) = registration.merchant_prepare_id() else {
            return;
        };

        match self.store.expire_prepared(&registration.id, prepare_id, now).await {
            Ok(true) => {
                report.expired += 1;
                tracing::info!(
                    event = "PAYMENT_EXPIRED",
                    registration_id = %registration.id,
                    merchant_prepare_id = prepare_id,
                    expires_at = ?registration.payment_info.as_ref().and_then(|info| info.expires_at),
                    "⏰ Prepared payment expired"
                );
            }
            // Sudah di-complete atau di-prepare ulang sejak dibaca
            Ok(false) => {}
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    registration_id = %registration.id,
                    error = %e,
                    "❌ Failed to expire prepared payment"
                );
            }
        }
    }

    /// Start sweeper di background task
    pub fn start(self) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        tracing::info!(
            "⏰ Starting payment expiry sweeper (every {}s)",
            self.interval.as_secs()
        );

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = self.sweep_once(Utc::now()).await;
                        if report.expired > 0 || report.failed > 0 {
                            tracing::info!(
                                scanned = report.scanned,
                                expired = report.expired,
                                failed = report.failed,
                                "🧹 Payment expiry sweep finished"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("🛑 Payment expiry sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

impl SweeperHandle {
    /// Hentikan sweeper dan tunggu task selesai
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "❌ Payment expiry sweeper task failed");
        }
    }
}
