//! Buffer of requests awaiting transmission.

use querysync_shared::{ClientRequest, QueryId};

struct OutboxEntry {
    key: Option<QueryId>,
    request: ClientRequest,
}

/// Ordered pending requests, flushed in enqueue order on reconnect.
///
/// Read kinds are keyed by QueryId: at most one entry per identity, a later
/// enqueue replaces the payload in place so the position of the first enqueue
/// is kept. Write kinds are unkeyed and never deduplicated — every write must
/// eventually be delivered.
#[derive(Default)]
pub struct Outbox {
    entries: Vec<OutboxEntry>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: Option<QueryId>, request: ClientRequest) {
        if let Some(key) = &key {
            if let Some(existing) = self
                .entries
                .iter_mut()
                .find(|entry| entry.key.as_ref() == Some(key))
            {
                existing.request = request;
                return;
            }
        }
        self.entries.push(OutboxEntry { key, request });
    }

    pub fn drain(&mut self) -> Vec<ClientRequest> {
        self.entries.drain(..).map(|entry| entry.request).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querysync_shared::QuerySpec;
    use serde_json::json;

    fn read_request(params: serde_json::Value) -> (QueryId, ClientRequest) {
        let spec = QuerySpec::find("app", "tasks", params);
        let id = spec.compute_id().unwrap();
        let request = ClientRequest {
            id: id.to_string(),
            spec,
        };
        (id, request)
    }

    fn write_request(n: u64) -> ClientRequest {
        let spec = QuerySpec::insert("app", "tasks", json!({"n": n}));
        ClientRequest {
            id: format!("write-{n}"),
            spec,
        }
    }

    #[test]
    fn reads_with_same_id_are_deduplicated() {
        let mut outbox = Outbox::new();
        let (id, first) = read_request(json!({"done": false}));
        let (_, second) = read_request(json!({"done": false}));
        outbox.push(Some(id.clone()), first);
        outbox.push(Some(id), second);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn writes_are_never_deduplicated() {
        let mut outbox = Outbox::new();
        outbox.push(None, write_request(1));
        outbox.push(None, write_request(1));
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn replace_keeps_first_enqueue_position() {
        let mut outbox = Outbox::new();
        let (find_id, find_first) = read_request(json!({"done": false}));
        outbox.push(Some(find_id.clone()), find_first);
        outbox.push(None, write_request(1));
        let (_, find_again) = read_request(json!({"done": false}));
        outbox.push(Some(find_id.clone()), find_again);

        let drained = outbox.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, find_id.to_string());
        assert_eq!(drained[1].id, "write-1");
        assert!(outbox.is_empty());
    }

    #[test]
    fn distinct_reads_keep_both_entries() {
        let mut outbox = Outbox::new();
        let (id_a, req_a) = read_request(json!({"done": false}));
        let (id_b, req_b) = read_request(json!({"done": true}));
        outbox.push(Some(id_a), req_a);
        outbox.push(Some(id_b), req_b);
        assert_eq!(outbox.len(), 2);
    }
}
