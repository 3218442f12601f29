#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use simplequeue::errors::SqError;
use simplequeue::mailbox::{keys, Assignment, Mailbox, Message, Verdict};
use simplequeue::types::{Engine, StatusRecord, TaskExit, TaskIndex};

/// What a fake engine did, in the order it did it (shared by all engines
/// of one test).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    Started { engine: String, index: TaskIndex },
    Finished { engine: String, index: TaskIndex },
}

#[derive(Debug, Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<TimelineEvent>>>);

impl Timeline {
    pub fn push(&self, event: TimelineEvent) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<TimelineEvent> {
        self.0.lock().unwrap().clone()
    }

    /// Position of the `Started` event for `index`.
    pub fn started_at(&self, index: TaskIndex) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, TimelineEvent::Started { index: i, .. } if *i == index))
    }

    /// Position of the `Finished` event for `index`.
    pub fn finished_at(&self, index: TaskIndex) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, TimelineEvent::Finished { index: i, .. } if *i == index))
    }

    pub fn started_by(&self, engine: &str) -> Vec<TaskIndex> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                TimelineEvent::Started { engine: en, index } if en == engine => Some(*index),
                _ => None,
            })
            .collect()
    }
}

/// How a fake engine's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeOutcome {
    pub accepted: bool,
    pub tasks: Vec<TaskIndex>,
    pub got_bye: bool,
}

/// In-process engine speaking the mailbox protocol.
///
/// Commands are interpreted instead of executed:
/// - `exit N`: report exit code N
/// - `sleep MS`: wait MS milliseconds, then report success
/// - `signal N`: report death by signal N
/// - `rogue`: report a rogue record
/// - `hang`: never report
/// - anything else: report success
pub struct FakeEngine {
    mailbox: Arc<dyn Mailbox>,
    engine: Engine,
    timeline: Timeline,
}

impl FakeEngine {
    pub fn new(mailbox: Arc<dyn Mailbox>, id: &str, host: &str, timeline: Timeline) -> Self {
        Self {
            mailbox,
            engine: Engine::new(id, host),
            timeline,
        }
    }

    pub async fn run(self) -> anyhow::Result<FakeOutcome> {
        self.mailbox
            .store(
                keys::ENGINE_INFO,
                Message::Registration {
                    host: self.engine.host.clone(),
                    engine_id: self.engine.id.clone(),
                },
            )
            .await?;

        let verdict = self
            .mailbox
            .fetch(&keys::engine_status(&self.engine.id))
            .await?
            .into_verdict()?;

        let mut outcome = FakeOutcome {
            accepted: verdict == Verdict::Accepted,
            tasks: Vec::new(),
            got_bye: false,
        };
        if !outcome.accepted {
            return Ok(outcome);
        }

        let inbox = keys::engine_task(&self.engine.id);
        loop {
            let assignment = match self.mailbox.fetch(&inbox).await {
                Ok(message) => message.into_assignment()?,
                Err(SqError::MailboxClosed) => break,
                Err(e) => return Err(e.into()),
            };

            match assignment {
                Assignment::Bye => {
                    outcome.got_bye = true;
                    break;
                }
                Assignment::Task { index, command } => {
                    outcome.tasks.push(index);
                    self.execute(index, &command).await?;
                }
            }
        }

        Ok(outcome)
    }

    async fn execute(&self, index: TaskIndex, command: &str) -> anyhow::Result<()> {
        self.timeline.push(TimelineEvent::Started {
            engine: self.engine.id.clone(),
            index,
        });
        let started_at = Utc::now();

        let mut words = command.split_whitespace();
        let (exit, rogue) = match (words.next(), words.next()) {
            (Some("hang"), _) => return Ok(()),
            (Some("exit"), Some(code)) => (TaskExit::Code(code.parse()?), false),
            (Some("signal"), Some(sig)) => (TaskExit::Signal(sig.parse()?), false),
            (Some("sleep"), Some(ms)) => {
                tokio::time::sleep(Duration::from_millis(ms.parse()?)).await;
                (TaskExit::Code(0), false)
            }
            (Some("rogue"), _) => (TaskExit::Terminated, true),
            _ => (TaskExit::Code(0), false),
        };

        self.timeline.push(TimelineEvent::Finished {
            engine: self.engine.id.clone(),
            index,
        });

        let record = StatusRecord {
            exit,
            started_at: Some(started_at),
            stopped_at: Some(Utc::now()),
            rogue,
            pid: Some(4242),
            host: self.engine.host.clone(),
            engine_id: self.engine.id.clone(),
        };
        self.mailbox
            .store(&keys::task_status(index), Message::Status(record))
            .await?;
        Ok(())
    }
}
