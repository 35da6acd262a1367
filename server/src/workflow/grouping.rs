//! Greedy semantic clustering of emails into task groups

use std::collections::HashMap;

use entity::email;
use serde::Serialize;

use crate::{embed::cosine_similarity, server_config::WorkflowConfig, util::id_set_key};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailGroup {
    pub key: String,
    pub email_ids: Vec<i32>,
}

struct GroupDraft {
    email_ids: Vec<i32>,
    centroid: Option<Vec<f32>>,
    vectors: usize,
}

impl GroupDraft {
    fn new(email_id: i32, embedding: Option<&Vec<f32>>) -> Self {
        Self {
            email_ids: vec![email_id],
            centroid: embedding.cloned(),
            vectors: usize::from(embedding.is_some()),
        }
    }

    fn add(&mut self, email_id: i32, embedding: Option<&Vec<f32>>) {
        self.email_ids.push(email_id);
        let Some(embedding) = embedding else {
            return;
        };

        self.vectors += 1;
        match &mut self.centroid {
            Some(centroid) if centroid.len() == embedding.len() => {
                // Running mean
                let n = self.vectors as f32;
                for (c, x) in centroid.iter_mut().zip(embedding) {
                    *c += (x - *c) / n;
                }
            }
            Some(_) => {}
            None => self.centroid = Some(embedding.clone()),
        }
    }
}

/// Cluster emails, oldest first.
///
/// Emails sharing a provider thread id always land in the same group. Others
/// join the open group whose centroid is most similar, if that similarity
/// reaches `group_threshold`; otherwise they start a new group. Emails
/// without an embedding only join through their thread id.
pub fn group_emails(
    emails: &[email::Model],
    embeddings: &HashMap<i32, Vec<f32>>,
    config: &WorkflowConfig,
) -> Vec<EmailGroup> {
    let mut sorted: Vec<&email::Model> = emails.iter().collect();
    sorted.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));

    let max_group_size = config.max_group_size.max(1);
    let mut groups: Vec<GroupDraft> = Vec::new();
    let mut by_thread: HashMap<&str, usize> = HashMap::new();

    for email in sorted {
        let embedding = embeddings.get(&email.id);

        let thread_group = email
            .thread_id
            .as_deref()
            .and_then(|tid| by_thread.get(tid).copied());

        let target = thread_group.or_else(|| {
            let embedding = embedding?;
            groups
                .iter()
                .enumerate()
                .filter(|(_, g)| g.email_ids.len() < max_group_size)
                .filter_map(|(idx, g)| {
                    let centroid = g.centroid.as_ref()?;
                    let similarity = cosine_similarity(centroid, embedding);
                    (similarity >= config.group_threshold).then_some((idx, similarity))
                })
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(idx, _)| idx)
        });

        let idx = match target {
            Some(idx) => {
                groups[idx].add(email.id, embedding);
                idx
            }
            None => {
                groups.push(GroupDraft::new(email.id, embedding));
                groups.len() - 1
            }
        };

        if let Some(tid) = email.thread_id.as_deref() {
            by_thread.entry(tid).or_insert(idx);
        }
    }

    groups
        .into_iter()
        .map(|g| EmailGroup {
            key: id_set_key(&g.email_ids),
            email_ids: g.email_ids,
        })
        .collect()
}
