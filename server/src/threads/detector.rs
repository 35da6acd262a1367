use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, FixedOffset};
use entity::email;

use crate::{
    embed::{content::clean_body, cosine_similarity},
    server_config::ThreadConfig,
    threads::{
        normalize::{
            bare_address, is_generic_subject, normalize_subject, participant_overlap, participants,
        },
        EmailThread, ThreadEvent, ThreadEventKind, ThreadPriority, ThreadStatus, ThreadType,
    },
    util::{id_set_key, keyword_hits, padded_words},
};

const RESOLUTION_KEYWORDS: &[&str] = &[
    "resolved",
    "solved",
    "fixed",
    "closed",
    "completed",
    "all set",
    "no longer needed",
    "never mind",
    "nevermind",
];

const HIGH_PRIORITY_SCORE: f64 = 0.7;
const MEDIUM_PRIORITY_SCORE: f64 = 0.4;
const ANNOUNCEMENT_MIN_RECIPIENTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinReason {
    Start,
    ProviderThread,
    Subject,
    Semantic,
}

/// A thread while emails are still being assigned
struct Draft<'a> {
    members: Vec<(&'a email::Model, JoinReason)>,
    subject: String,
    participants: BTreeSet<String>,
    started_at: DateTime<FixedOffset>,
    last_activity: DateTime<FixedOffset>,
    alive: bool,
}

impl<'a> Draft<'a> {
    fn new(email: &'a email::Model, subject: String, participants: BTreeSet<String>) -> Self {
        Self {
            members: vec![(email, JoinReason::Start)],
            subject,
            participants,
            started_at: email.received_at,
            last_activity: email.received_at,
            alive: true,
        }
    }

    fn add(&mut self, email: &'a email::Model, reason: JoinReason, participants: BTreeSet<String>) {
        if self.subject.is_empty() {
            self.subject = normalize_subject(&email.subject);
        }
        self.participants.extend(participants);
        self.started_at = self.started_at.min(email.received_at);
        self.last_activity = self.last_activity.max(email.received_at);
        self.members.push((email, reason));
    }

    fn within_window(&self, at: DateTime<FixedOffset>, window: Duration) -> bool {
        at >= self.started_at - window && at <= self.last_activity + window
    }
}

/// Groups emails into conversation threads.
///
/// Emails join a thread through a shared provider thread id, or through an
/// equal normalized subject with enough participant overlap inside the time
/// window. When embeddings are supplied, lone emails with an empty or
/// generic subject are merged into their most similar thread.
pub struct ThreadDetector {
    config: ThreadConfig,
    user_address: Option<String>,
}

impl ThreadDetector {
    pub fn new(config: ThreadConfig, user_address: Option<&str>) -> Self {
        Self {
            config,
            user_address: user_address
                .map(bare_address)
                .filter(|addr| !addr.is_empty()),
        }
    }

    fn window(&self) -> Duration {
        Duration::days(self.config.time_window_days)
    }

    /// Returns threads with the most recent activity first
    pub fn detect(
        &self,
        emails: &[email::Model],
        embeddings: Option<&HashMap<i32, Vec<f32>>>,
        now: DateTime<FixedOffset>,
    ) -> Vec<EmailThread> {
        let mut sorted: Vec<&email::Model> = emails.iter().collect();
        sorted.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));

        let mut drafts: Vec<Draft> = Vec::new();
        let mut by_provider: HashMap<&str, usize> = HashMap::new();

        for email in sorted {
            let subject = normalize_subject(&email.subject);
            let email_participants = participants(email);

            let provider_match = email
                .thread_id
                .as_deref()
                .and_then(|tid| by_provider.get(tid).copied());

            let target = match provider_match {
                Some(idx) => Some((idx, JoinReason::ProviderThread)),
                None => self
                    .subject_match(&drafts, email, &subject, &email_participants)
                    .map(|idx| (idx, JoinReason::Subject)),
            };

            let idx = match target {
                Some((idx, reason)) => {
                    drafts[idx].add(email, reason, email_participants);
                    idx
                }
                None => {
                    drafts.push(Draft::new(email, subject, email_participants));
                    drafts.len() - 1
                }
            };

            if let Some(tid) = email.thread_id.as_deref() {
                by_provider.entry(tid).or_insert(idx);
            }
        }

        if let Some(embeddings) = embeddings {
            self.semantic_merge(&mut drafts, embeddings);
        }

        let mut threads: Vec<EmailThread> = drafts
            .into_iter()
            .filter(|d| d.alive)
            .map(|d| self.finish(d, now))
            .collect();

        threads.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
        threads
    }

    /// Best live thread with the same non-empty subject, enough participant
    /// overlap and recent enough activity
    fn subject_match(
        &self,
        drafts: &[Draft],
        email: &email::Model,
        subject: &str,
        email_participants: &BTreeSet<String>,
    ) -> Option<usize> {
        if subject.is_empty() {
            return None;
        }

        drafts
            .iter()
            .enumerate()
            .filter(|(_, d)| d.alive && d.subject == subject)
            .filter(|(_, d)| email.received_at - d.last_activity <= self.window())
            .map(|(idx, d)| (idx, d, participant_overlap(email_participants, &d.participants)))
            .filter(|(_, _, overlap)| *overlap >= self.config.min_participant_overlap)
            .max_by(|a, b| {
                a.2.total_cmp(&b.2)
                    .then_with(|| a.1.last_activity.cmp(&b.1.last_activity))
            })
            .map(|(idx, _, _)| idx)
    }

    fn semantic_merge(&self, drafts: &mut [Draft], embeddings: &HashMap<i32, Vec<f32>>) {
        let candidates: Vec<usize> = drafts
            .iter()
            .enumerate()
            .filter(|(_, d)| d.members.len() == 1 && is_generic_subject(&d.subject))
            .map(|(idx, _)| idx)
            .collect();

        for source in candidates {
            if !drafts[source].alive || drafts[source].members.len() != 1 {
                continue;
            }
            let email = drafts[source].members[0].0;
            let Some(vector) = embeddings.get(&email.id) else {
                continue;
            };

            let best = drafts
                .iter()
                .enumerate()
                .filter(|(idx, d)| *idx != source && d.alive)
                // Only later emails merge, so the thread keeps its starter
                .filter(|(_, d)| email.received_at >= d.started_at)
                .filter(|(_, d)| d.within_window(email.received_at, self.window()))
                .filter(|(_, d)| {
                    participant_overlap(&drafts[source].participants, &d.participants)
                        >= self.config.min_participant_overlap
                })
                .filter_map(|(idx, d)| {
                    let similarity = d
                        .members
                        .iter()
                        .filter_map(|(member, _)| embeddings.get(&member.id))
                        .map(|other| cosine_similarity(vector, other))
                        .fold(f32::NEG_INFINITY, f32::max);
                    (similarity >= self.config.semantic_threshold).then_some((idx, similarity))
                })
                .max_by(|a, b| a.1.total_cmp(&b.1));

            if let Some((target, similarity)) = best {
                tracing::debug!(
                    "Merging email {} into thread of email {} (similarity {:.3})",
                    email.id,
                    drafts[target].members[0].0.id,
                    similarity
                );
                let source_participants = std::mem::take(&mut drafts[source].participants);
                drafts[source].alive = false;
                drafts[target].add(email, JoinReason::Semantic, source_participants);
            }
        }
    }

    fn finish(&self, draft: Draft, now: DateTime<FixedOffset>) -> EmailThread {
        let mut members = draft.members;
        members.sort_by(|a, b| a.0.received_at.cmp(&b.0.received_at).then(a.0.id.cmp(&b.0.id)));

        let email_ids: Vec<i32> = members.iter().map(|(e, _)| e.id).collect();
        let evolution = evolution(&members, &draft.subject);
        let emails: Vec<&email::Model> = members.iter().map(|(e, _)| *e).collect();

        EmailThread {
            id: id_set_key(&email_ids),
            normalized_subject: draft.subject,
            message_count: email_ids.len(),
            email_ids,
            participants: draft.participants.into_iter().collect(),
            started_at: draft.started_at,
            last_activity: draft.last_activity,
            thread_type: thread_type(&emails),
            priority: thread_priority(&emails),
            status: self.thread_status(&emails, draft.last_activity, now),
            evolution,
        }
    }

    fn thread_status(
        &self,
        emails: &[&email::Model],
        last_activity: DateTime<FixedOffset>,
        now: DateTime<FixedOffset>,
    ) -> ThreadStatus {
        let Some(last) = emails.last() else {
            return ThreadStatus::Active;
        };

        let last_text = padded_words(&format!(
            "{} {}",
            last.subject,
            clean_body(last.body_text.as_deref(), last.body_html.as_deref())
        ));

        if keyword_hits(&last_text, RESOLUTION_KEYWORDS) > 0 {
            ThreadStatus::Resolved
        } else if now - last_activity > Duration::days(self.config.stale_after_days) {
            ThreadStatus::Stale
        } else if self
            .user_address
            .as_deref()
            .is_some_and(|user| bare_address(&last.sender) != user)
        {
            ThreadStatus::AwaitingReply
        } else {
            ThreadStatus::Active
        }
    }
}

fn thread_type(emails: &[&email::Model]) -> ThreadType {
    let senders: BTreeSet<String> = emails.iter().map(|e| bare_address(&e.sender)).collect();

    match emails {
        [] | [_] => ThreadType::SingleMessage,
        _ if senders.len() >= 2 => ThreadType::Conversation,
        [first, ..] if first.recipients.len() + first.cc.len() >= ANNOUNCEMENT_MIN_RECIPIENTS => {
            ThreadType::Announcement
        }
        _ => ThreadType::FollowUpChain,
    }
}

fn thread_priority(emails: &[&email::Model]) -> ThreadPriority {
    let flagged = emails.iter().any(|e| e.is_flagged);
    let peak = emails
        .iter()
        .map(|e| e.importance_score.max(e.urgency_score))
        .fold(0.0, f64::max);

    if flagged || peak >= HIGH_PRIORITY_SCORE {
        ThreadPriority::High
    } else if peak >= MEDIUM_PRIORITY_SCORE {
        ThreadPriority::Medium
    } else {
        ThreadPriority::Low
    }
}

fn evolution(members: &[(&email::Model, JoinReason)], thread_subject: &str) -> Vec<ThreadEvent> {
    let mut events = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    if let Some((starter, _)) = members.iter().find(|(_, r)| *r == JoinReason::Start) {
        seen.extend(participants(starter));
    }

    for (email, reason) in members {
        let event = |kind| ThreadEvent {
            email_id: email.id,
            at: email.received_at,
            kind,
        };

        if *reason == JoinReason::Start {
            events.push(event(ThreadEventKind::Started));
            continue;
        }

        events.push(event(ThreadEventKind::Reply));

        for participant in participants(email) {
            if seen.insert(participant.clone()) {
                events.push(event(ThreadEventKind::ParticipantJoined(participant)));
            }
        }

        if matches!(reason, JoinReason::ProviderThread | JoinReason::Semantic) {
            let subject = normalize_subject(&email.subject);
            if !subject.is_empty() && subject != thread_subject {
                events.push(event(ThreadEventKind::SubjectChanged(subject)));
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn base_time() -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap().fixed_offset()
    }

    fn mail(id: i32, sender: &str, to: &[&str], subject: &str, hours: i64) -> email::Model {
        let at = base_time() + Duration::hours(hours);
        email::Model {
            id,
            user_id: 1,
            message_id: format!("<{}@test>", id),
            thread_id: None,
            sender: sender.to_string(),
            recipients: to.iter().map(|s| s.to_string()).collect(),
            cc: Vec::new(),
            subject: subject.to_string(),
            body_text: Some("Some body text.".to_string()),
            body_html: None,
            received_at: at,
            importance_score: 0.0,
            urgency_score: 0.0,
            category: None,
            is_important: false,
            is_flagged: false,
            has_attachments: false,
            tasks_generated: false,
            embeddings_generated: true,
            created_at: at,
            updated_at: at,
        }
    }

    fn detector() -> ThreadDetector {
        ThreadDetector::new(ThreadConfig::default(), Some("Me <me@example.com>"))
    }

    fn now() -> DateTime<FixedOffset> {
        base_time() + Duration::days(1)
    }

    #[test]
    fn test_reply_chain_by_subject() {
        let emails = vec![
            mail(1, "alice@example.com", &["me@example.com"], "Budget 2024", 0),
            mail(2, "me@example.com", &["alice@example.com"], "Re: Budget 2024", 2),
            mail(3, "Alice <alice@example.com>", &["me@example.com"], "RE: Re: budget 2024", 4),
        ];
        let threads = detector().detect(&emails, None, now());

        assert_eq!(threads.len(), 1);
        let thread = &threads[0];
        assert_eq!(thread.email_ids, vec![1, 2, 3]);
        assert_eq!(thread.normalized_subject, "budget 2024");
        assert_eq!(thread.message_count, 3);
        assert_eq!(thread.thread_type, ThreadType::Conversation);
        assert_eq!(thread.status, ThreadStatus::AwaitingReply);
        assert_eq!(thread.started_at, base_time());
        assert_eq!(thread.last_activity, base_time() + Duration::hours(4));
        assert_eq!(
            thread.participants,
            vec!["alice@example.com".to_string(), "me@example.com".to_string()]
        );
    }

    #[test]
    fn test_same_subject_different_people_split() {
        let emails = vec![
            mail(1, "alice@example.com", &["me@example.com"], "Hello", 0),
            mail(2, "bob@other.org", &["carol@other.org"], "Hello", 1),
        ];
        let threads = detector().detect(&emails, None, now());
        assert_eq!(threads.len(), 2);
    }

    #[test]
    fn test_time_window_splits_threads() {
        let emails = vec![
            mail(1, "alice@example.com", &["me@example.com"], "Status", 0),
            mail(2, "alice@example.com", &["me@example.com"], "Re: Status", 24 * 20),
        ];
        let threads = detector().detect(&emails, None, now() + Duration::days(20));
        assert_eq!(threads.len(), 2);
        // newest activity first
        assert_eq!(threads[0].email_ids, vec![2]);
    }

    #[test]
    fn test_provider_thread_id_wins_and_records_subject_change() {
        let mut a = mail(1, "alice@example.com", &["me@example.com"], "Project kickoff", 0);
        let mut b = mail(2, "dave@vendor.com", &["me@example.com"], "Contract draft", 3);
        a.thread_id = Some("T1".to_string());
        b.thread_id = Some("T1".to_string());

        let threads = detector().detect(&[a, b], None, now());
        assert_eq!(threads.len(), 1);

        let kinds: Vec<ThreadEventKind> =
            threads[0].evolution.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                ThreadEventKind::Started,
                ThreadEventKind::Reply,
                ThreadEventKind::ParticipantJoined("dave@vendor.com".to_string()),
                ThreadEventKind::SubjectChanged("contract draft".to_string()),
            ]
        );
    }

    #[test]
    fn test_different_provider_threads_join_on_subject() {
        let mut a = mail(1, "alice@example.com", &["me@example.com"], "Re: Budget review", 0);
        let mut b = mail(2, "alice@example.com", &["me@example.com"], "Re: Budget review", 1);
        a.thread_id = Some("T1".to_string());
        b.thread_id = Some("T2".to_string());

        let threads = detector().detect(&[a, b], None, now());
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].email_ids, vec![1, 2]);
    }

    #[test]
    fn test_provider_id_of_subject_joined_email_pulls_later_replies() {
        let mut a = mail(1, "alice@example.com", &["me@example.com"], "Budget review", 0);
        let mut b = mail(2, "alice@example.com", &["me@example.com"], "Re: Budget review", 1);
        let mut c = mail(3, "bob@example.com", &["me@example.com"], "Numbers", 2);
        a.thread_id = Some("T1".to_string());
        b.thread_id = Some("T2".to_string());
        c.thread_id = Some("T2".to_string());

        let threads = detector().detect(&[a, b, c], None, now());
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].email_ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_thread_types() {
        let single = detector().detect(
            &[mail(1, "a@x.com", &["me@example.com"], "One", 0)],
            None,
            now(),
        );
        assert_eq!(single[0].thread_type, ThreadType::SingleMessage);

        let team = ["me@example.com", "b@x.com", "c@x.com"];
        let announcement = detector().detect(
            &[
                mail(1, "news@x.com", &team, "Launch", 0),
                mail(2, "news@x.com", &team, "Re: Launch", 1),
            ],
            None,
            now(),
        );
        assert_eq!(announcement[0].thread_type, ThreadType::Announcement);

        let chain = detector().detect(
            &[
                mail(1, "a@x.com", &["me@example.com"], "Invoice", 0),
                mail(2, "a@x.com", &["me@example.com"], "Re: Invoice", 1),
            ],
            None,
            now(),
        );
        assert_eq!(chain[0].thread_type, ThreadType::FollowUpChain);
    }

    #[test]
    fn test_priority() {
        let mut flagged = mail(1, "a@x.com", &["me@example.com"], "A", 0);
        flagged.is_flagged = true;
        let mut medium = mail(2, "b@x.com", &["me@example.com"], "B", 0);
        medium.urgency_score = 0.5;
        let low = mail(3, "c@x.com", &["me@example.com"], "C", 0);

        let threads = detector().detect(&[flagged, medium, low], None, now());
        let priority_of = |id: i32| {
            threads
                .iter()
                .find(|t| t.email_ids == vec![id])
                .map(|t| t.priority)
                .unwrap()
        };
        assert_eq!(priority_of(1), ThreadPriority::High);
        assert_eq!(priority_of(2), ThreadPriority::Medium);
        assert_eq!(priority_of(3), ThreadPriority::Low);
    }

    #[test]
    fn test_status() {
        let mut resolved = mail(1, "a@x.com", &["me@example.com"], "Printer", 0);
        resolved.body_text = Some("The printer issue is fixed now.".to_string());
        let threads = detector().detect(&[resolved], None, now());
        assert_eq!(threads[0].status, ThreadStatus::Resolved);

        let old = mail(2, "a@x.com", &["me@example.com"], "Old topic", 0);
        let threads = detector().detect(&[old], None, now() + Duration::days(30));
        assert_eq!(threads[0].status, ThreadStatus::Stale);

        let mine = mail(3, "me@example.com", &["a@x.com"], "Sent by me", 0);
        let threads = detector().detect(&[mine.clone()], None, now());
        assert_eq!(threads[0].status, ThreadStatus::Active);

        let anonymous = ThreadDetector::new(ThreadConfig::default(), None);
        let other = mail(4, "a@x.com", &["me@example.com"], "Question on report", 0);
        assert_eq!(
            anonymous.detect(&[other], None, now())[0].status,
            ThreadStatus::Active
        );
    }

    #[test]
    fn test_semantic_merge_of_generic_subject() {
        let emails = vec![
            mail(1, "alice@example.com", &["me@example.com"], "Server migration plan", 0),
            mail(2, "alice@example.com", &["me@example.com"], "Quick question", 5),
            mail(3, "zed@else.org", &["other@else.org"], "Hi", 6),
        ];
        let mut embeddings = HashMap::new();
        embeddings.insert(1, vec![1.0, 0.0, 0.0]);
        embeddings.insert(2, vec![0.95, 0.05, 0.0]);
        embeddings.insert(3, vec![0.96, 0.04, 0.0]);

        // Without vectors nothing merges
        assert_eq!(detector().detect(&emails, None, now()).len(), 3);

        let threads = detector().detect(&emails, Some(&embeddings), now());
        // Email 3 is similar but shares too few participants
        assert_eq!(threads.len(), 2);
        let merged = threads.iter().find(|t| t.message_count == 2).unwrap();
        assert_eq!(merged.email_ids, vec![1, 2]);
        assert_eq!(merged.normalized_subject, "server migration plan");
        assert!(merged
            .evolution
            .iter()
            .any(|e| e.kind == ThreadEventKind::SubjectChanged("quick question".to_string())));
    }

    #[test]
    fn test_older_email_is_not_merged_before_thread_start() {
        let emails = vec![
            mail(1, "alice@example.com", &["me@example.com"], "Quick question", 0),
            mail(2, "alice@example.com", &["me@example.com"], "Server migration plan", 5),
        ];
        let mut embeddings = HashMap::new();
        embeddings.insert(1, vec![1.0, 0.0, 0.0]);
        embeddings.insert(2, vec![0.99, 0.01, 0.0]);

        let threads = detector().detect(&emails, Some(&embeddings), now());
        assert_eq!(threads.len(), 2);
        for thread in &threads {
            assert_eq!(thread.evolution.len(), 1);
            assert_eq!(thread.evolution[0].kind, ThreadEventKind::Started);
        }
    }

    #[test]
    fn test_evolution_starts_with_thread_starter() {
        let emails = vec![
            mail(1, "alice@example.com", &["me@example.com"], "Server migration plan", 0),
            mail(2, "alice@example.com", &["me@example.com", "ops@example.com"], "Hi", 3),
        ];
        let mut embeddings = HashMap::new();
        embeddings.insert(1, vec![1.0, 0.0, 0.0]);
        embeddings.insert(2, vec![0.98, 0.02, 0.0]);

        let threads = detector().detect(&emails, Some(&embeddings), now());
        assert_eq!(threads.len(), 1);
        let events: Vec<(i32, ThreadEventKind)> = threads[0]
            .evolution
            .iter()
            .map(|e| (e.email_id, e.kind.clone()))
            .collect();
        assert_eq!(
            events,
            vec![
                (1, ThreadEventKind::Started),
                (2, ThreadEventKind::Reply),
                (2, ThreadEventKind::ParticipantJoined("ops@example.com".to_string())),
                (2, ThreadEventKind::SubjectChanged("hi".to_string())),
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(detector().detect(&[], None, now()).is_empty());
    }
}
