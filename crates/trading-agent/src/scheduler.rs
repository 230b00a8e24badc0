use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use tokio::time;

use crate::config::AgentConfig;
use crate::worker::{AgentCommand, AgentHandle};

/// How long after its time a job may still fire.
const FIRE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub at: NaiveTime,
    pub command: AgentCommand,
}

/// Weekday wall-clock triggers in a fixed timezone. Only enqueues commands;
/// the worker decides when they actually run.
pub struct Scheduler {
    timezone: Tz,
    jobs: Vec<Job>,
    last_fired: HashMap<usize, NaiveDate>,
}

impl Scheduler {
    pub fn new(timezone: Tz, mut jobs: Vec<Job>) -> Self {
        jobs.sort_by_key(|job| job.at);
        Self {
            timezone,
            jobs,
            last_fired: HashMap::new(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        let mut jobs = vec![
            Job {
                at: config.risk_reset_time,
                command: AgentCommand::ResetRisk,
            },
            Job {
                at: config.daily_report_time,
                command: AgentCommand::DailyReport,
            },
        ];
        jobs.extend(config.analysis_times.iter().map(|&at| Job {
            at,
            command: AgentCommand::RunCycle,
        }));
        Self::new(config.timezone, jobs)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Commands whose time has come at `now`. Each job fires at most once
    /// per local day, and never on Saturday or Sunday.
    pub fn due_jobs(&mut self, now: DateTime<Utc>) -> Vec<AgentCommand> {
        let local = now.with_timezone(&self.timezone);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return Vec::new();
        }

        let today = local.date_naive();
        let time = local.time();
        let mut due = Vec::new();
        for (i, job) in self.jobs.iter().enumerate() {
            let elapsed = time.signed_duration_since(job.at).num_seconds();
            if !(0..FIRE_WINDOW_SECS).contains(&elapsed) {
                continue;
            }
            if self.last_fired.get(&i) == Some(&today) {
                continue;
            }
            self.last_fired.insert(i, today);
            due.push(job.command);
        }
        due
    }

    /// Tick until Ctrl-C, then ask the worker to shut down.
    pub async fn run(mut self, handle: AgentHandle, tick: Duration) -> Result<()> {
        for job in self.jobs() {
            tracing::info!(
                "Scheduled {:?} at {} ({})",
                job.command,
                job.at.format("%H:%M"),
                self.timezone
            );
        }

        let mut interval = time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for command in self.due_jobs(Utc::now()) {
                        tracing::info!("Triggering {:?}", command);
                        handle.send(command).await?;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received, stopping scheduler...");
                    handle.send(AgentCommand::Shutdown).await?;
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(
            chrono_tz::Asia::Seoul,
            vec![
                Job {
                    at: hm(8, 30),
                    command: AgentCommand::RunCycle,
                },
                Job {
                    at: hm(8, 0),
                    command: AgentCommand::ResetRisk,
                },
            ],
        )
    }

    /// Seoul wall-clock time converted to UTC.
    fn seoul(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        chrono_tz::Asia::Seoul
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_jobs_sorted_by_time() {
        let s = scheduler();
        assert_eq!(s.jobs()[0].command, AgentCommand::ResetRisk);
    }

    #[test]
    fn test_fires_once_within_window() {
        let mut s = scheduler();
        // Monday 2024-03-04
        assert!(s.due_jobs(seoul(2024, 3, 4, 8, 29, 59)).is_empty());
        assert_eq!(
            s.due_jobs(seoul(2024, 3, 4, 8, 30, 10)),
            vec![AgentCommand::RunCycle]
        );
        assert!(s.due_jobs(seoul(2024, 3, 4, 8, 30, 40)).is_empty());
        assert!(s.due_jobs(seoul(2024, 3, 4, 8, 31, 0)).is_empty());

        // next day fires again
        assert_eq!(
            s.due_jobs(seoul(2024, 3, 5, 8, 30, 0)),
            vec![AgentCommand::RunCycle]
        );
    }

    #[test]
    fn test_skips_weekends() {
        let mut s = scheduler();
        // Saturday and Sunday
        assert!(s.due_jobs(seoul(2024, 3, 2, 8, 0, 5)).is_empty());
        assert!(s.due_jobs(seoul(2024, 3, 3, 8, 30, 5)).is_empty());
    }

    #[test]
    fn test_uses_schedule_timezone() {
        let mut s = scheduler();
        // 23:30 UTC Sunday is 08:30 Monday in Seoul
        let now = Utc.with_ymd_and_hms(2024, 3, 3, 23, 30, 0).unwrap();
        assert_eq!(s.due_jobs(now), vec![AgentCommand::RunCycle]);
    }
}
