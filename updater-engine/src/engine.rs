//! One full sweep: list, filter, resolve and update across a bounded worker
//! pool, then update the self-hosting service last.
//!
//! Sweep phases:
//! 1. Listing: a failure aborts the sweep with [`SweepError::Listing`].
//! 2. Dispatching: eligible services go to at most `max_concurrency`
//!    concurrent workers; the self-hosting service is set aside.
//! 3. Draining: every dispatched worker is awaited; per-service failures
//!    are recorded, never escalated.
//! 4. Self-update: the set-aside service is re-fetched and updated alone.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use updater_core::{
    strip_digest, EngineConfig, OrchestratorClient, Service, ServiceOutcome, ServiceReport,
    SkipReason, SweepReport, SweepRequest, SweepStatus,
};

use crate::error::{ServiceError, SweepError};
use crate::resolver::DigestResolver;
use crate::updater::{ServiceUpdater, UpdateResult};

pub struct UpdateEngine {
    client: Arc<dyn OrchestratorClient>,
    config: Arc<EngineConfig>,
    worker: SweepWorker,
}

impl UpdateEngine {
    pub fn new(client: Arc<dyn OrchestratorClient>, config: EngineConfig) -> Self {
        let worker = SweepWorker {
            resolver: DigestResolver::new(client.clone()),
            updater: ServiceUpdater::new(client.clone(), config.honor_update_only),
        };
        Self {
            client,
            config: Arc::new(config),
            worker,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one sweep. Only a listing failure is an error; cancellation yields
    /// a report with [`SweepStatus::Cancelled`] and whatever finished so far.
    pub async fn run(
        &self,
        request: &SweepRequest,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, SweepError> {
        let started_at = Utc::now();

        let services = self
            .client
            .list_services()
            .await
            .map_err(SweepError::Listing)?;
        tracing::debug!(count = services.len(), "listed services");

        let mut reports = Vec::with_capacity(services.len());
        let mut parallel = Vec::new();
        let mut deferred = Vec::new();

        for service in services {
            if !self.config.eligible(&service) {
                tracing::debug!(service = %service.name, "service ignored by blacklist or missing label");
                reports.push(skipped(&service, SkipReason::Ineligible));
            } else if !request.matches(&service.image) {
                tracing::debug!(service = %service.name, image = %service.image, "service image not in filter");
                reports.push(skipped(&service, SkipReason::FilteredOut));
            } else if service.is_self() {
                deferred.push(service);
            } else {
                parallel.push(service);
            }
        }

        self.dispatch(parallel, cancel, &mut reports).await;

        for service in deferred {
            if cancel.is_cancelled() {
                reports.push(skipped(&service, SkipReason::Cancelled));
                continue;
            }
            reports.push(self.update_self(service, cancel).await);
        }

        let status = if cancel.is_cancelled() {
            SweepStatus::Cancelled
        } else {
            SweepStatus::Completed
        };

        Ok(SweepReport {
            status,
            started_at,
            finished_at: Utc::now(),
            services: reports,
        })
    }

    async fn dispatch(
        &self,
        services: Vec<Service>,
        cancel: &CancellationToken,
        reports: &mut Vec<ServiceReport>,
    ) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut workers = JoinSet::new();
        let mut in_flight = HashMap::new();
        let mut pending = services.into_iter();

        while let Some(service) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = permits.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                tracing::info!("sweep cancelled, no further services dispatched");
                reports.push(skipped(&service, SkipReason::Cancelled));
                reports.extend(pending.by_ref().map(|s| skipped(&s, SkipReason::Cancelled)));
                break;
            };

            let worker = self.worker.clone();
            let cancel = cancel.clone();
            let identity = (service.id.clone(), service.name.clone());
            let task = workers.spawn(async move {
                let _permit = permit;
                worker.process(service, &cancel).await
            });
            in_flight.insert(task.id(), identity);
        }

        // A worker that panicked still gets a report line.
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((_, report)) => reports.push(report),
                Err(err) => {
                    tracing::error!(error = %err, "service worker task failed");
                    if let Some((id, name)) = in_flight.remove(&err.id()) {
                        reports.push(ServiceReport {
                            id,
                            name,
                            outcome: ServiceOutcome::Failed {
                                error: format!("worker task failed: {err}"),
                            },
                        });
                    }
                }
            }
        }
    }

    // The definition listed at the start of the sweep may be stale by now.
    async fn update_self(&self, service: Service, cancel: &CancellationToken) -> ServiceReport {
        tracing::debug!(service = %service.name, "updating self-hosting service last");
        match self.client.get_service(&service.id).await {
            Ok(fresh) => self.worker.process(fresh, cancel).await,
            Err(source) => {
                let err = ServiceError::InspectFailed {
                    service: service.name.clone(),
                    source,
                };
                tracing::warn!(service = %service.name, error = %err, "cannot update service");
                ServiceReport::new(
                    &service,
                    ServiceOutcome::Failed {
                        error: err.to_string(),
                    },
                )
            }
        }
    }
}

#[derive(Clone)]
struct SweepWorker {
    resolver: DigestResolver,
    updater: ServiceUpdater,
}

impl SweepWorker {
    async fn process(&self, service: Service, cancel: &CancellationToken) -> ServiceReport {
        let id = service.id.clone();
        let name = service.name.clone();

        let outcome = match self.resolve_and_update(service, cancel).await {
            Ok(outcome) => outcome,
            Err(ServiceError::Cancelled { .. }) => {
                tracing::info!(service = %name, "service update cancelled");
                ServiceOutcome::Skipped {
                    reason: SkipReason::Cancelled,
                }
            }
            Err(err) => {
                tracing::warn!(service = %name, error = %err, "cannot update service");
                ServiceOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        ServiceReport { id, name, outcome }
    }

    async fn resolve_and_update(
        &self,
        service: Service,
        cancel: &CancellationToken,
    ) -> Result<ServiceOutcome, ServiceError> {
        let auth = self
            .updater
            .registry_auth(strip_digest(&service.image))
            .await?;
        let image = self.resolver.resolve(&service.image, auth.as_ref()).await?;

        if image == service.image {
            tracing::debug!(service = %service.name, "service is already up to date");
            return Ok(ServiceOutcome::AlreadyCurrent);
        }
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled {
                service: service.name,
            });
        }

        match self.updater.update(service, &image, auth, cancel).await? {
            UpdateResult::Updated { image } => Ok(ServiceOutcome::Updated { image }),
            UpdateResult::Unchanged => Ok(ServiceOutcome::AlreadyCurrent),
        }
    }
}

fn skipped(service: &Service, reason: SkipReason) -> ServiceReport {
    ServiceReport::new(service, ServiceOutcome::Skipped { reason })
}
