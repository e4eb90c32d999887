//! Scheduled card expiry jobs.
//!
//! Two daily jobs run off cron expressions:
//! - **Notice**: active cards expiring in `[today + 3 days, today + 4 days)`
//!   get an `expiring` notification
//! - **Sweep**: active or frozen cards expiring before tomorrow are marked
//!   `expired` and get an `expired` notification
//!
//! Card owners are loaded in one batch per run; notifications are dispatched
//! on background tasks after the status change is stored.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::models::card::Card;
use crate::services::notification::{Notification, NotificationDispatcher, NotificationKind};
use crate::store::{CardRepository, Store, UserDirectory};

/// Which expiry job a schedule drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryJob {
    Notice,
    Sweep,
}

impl ExpiryJob {
    fn name(&self) -> &'static str {
        match self {
            ExpiryJob::Notice => "expiry notice",
            ExpiryJob::Sweep => "expiry sweep",
        }
    }
}

pub struct ExpirySweeper<S: Store> {
    store: S,
    notifications: NotificationDispatcher,
}

impl<S: Store> Clone for ExpirySweeper<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Parse a six-field cron expression (seconds first), evaluated in UTC.
pub fn parse_schedule(expression: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(expression)
}

impl<S: Store> ExpirySweeper<S> {
    pub fn new(store: S, notifications: NotificationDispatcher) -> Self {
        Self {
            store,
            notifications,
        }
    }

    /// Warn owners of active cards that expire three days from `now`.
    ///
    /// Returns the cards that were notified.
    pub async fn notify_expiring_soon(&self, now: DateTime<Utc>) -> Result<Vec<Card>, AppError> {
        let start = start_of_day(now) + Duration::days(3);
        let end = start + Duration::days(1);

        let cards = self.store.cards_expiring_between(start, end).await?;
        self.fan_out(NotificationKind::Expiring, &cards).await?;

        Ok(cards)
    }

    /// Expire every active or frozen card whose expiry falls before the end
    /// of today. Cards missed by an earlier run are caught up.
    ///
    /// Returns the cards that changed status.
    pub async fn expire_due_cards(&self, now: DateTime<Utc>) -> Result<Vec<Card>, AppError> {
        let before = start_of_day(now) + Duration::days(1);

        let cards = self.store.expire_cards_due(before).await?;
        self.fan_out(NotificationKind::Expired, &cards).await?;

        Ok(cards)
    }

    async fn fan_out(&self, kind: NotificationKind, cards: &[Card]) -> Result<(), AppError> {
        if cards.is_empty() {
            return Ok(());
        }

        let owner_ids: Vec<_> = cards
            .iter()
            .map(|card| card.owner_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let owners: HashMap<_, _> = self
            .store
            .find_users_by_ids(&owner_ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        for card in cards {
            match owners.get(&card.owner_id) {
                Some(owner) => {
                    self.notifications
                        .dispatch(Notification::for_card(kind, owner, card));
                }
                None => {
                    tracing::warn!(card = %card.reference, "Card owner not found, notification skipped");
                }
            }
        }

        Ok(())
    }

    async fn run_job(&self, job: ExpiryJob) {
        let result = match job {
            ExpiryJob::Notice => self.notify_expiring_soon(Utc::now()).await,
            ExpiryJob::Sweep => self.expire_due_cards(Utc::now()).await,
        };

        match result {
            Ok(cards) => tracing::info!(job = job.name(), cards = cards.len(), "Expiry job finished"),
            Err(e) => tracing::error!(job = job.name(), error = %e, "Expiry job failed"),
        }
    }

    /// Run `job` at every tick of `schedule` until `shutdown` flips.
    pub fn spawn(
        &self,
        job: ExpiryJob,
        schedule: Schedule,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let sweeper = self.clone();

        tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    tracing::warn!(job = job.name(), "Schedule has no upcoming runs, stopping");
                    return;
                };

                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tracing::debug!(job = job.name(), next = %next, "Next expiry run scheduled");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => sweeper.run_job(job).await,
                    _ = shutdown.changed() => {
                        tracing::info!(job = job.name(), "Expiry scheduler stopped");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedules_parse() {
        let notice = parse_schedule("0 0 7 * * *").unwrap();
        let next = notice.upcoming(Utc).next().unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "07:00:00");

        assert!(parse_schedule("0 5 7 * * *").is_ok());
        assert!(parse_schedule("every morning").is_err());
    }

    #[test]
    fn start_of_day_truncates_to_midnight() {
        let now = DateTime::parse_from_rfc3339("2025-03-14T15:09:26Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(start_of_day(now).to_rfc3339(), "2025-03-14T00:00:00+00:00");
    }
}
