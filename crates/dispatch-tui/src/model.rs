//! In-memory model of the function calls observed during a session.
//!
//! The model reconstructs the root/parent/child hierarchy from the dispatch
//! identifiers carried on every request and tracks a per-call state machine
//! driven by request/response pairs. All mutation happens under the owner's
//! mutex; the render loop reads (and expires) entries under the same lock.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use dispatch_proto::{
    run_response, terminal_http_status, terminal_status, RunRequest, RunResponse, Status,
};

pub type DispatchId = String;

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub ts: DateTime<Utc>,
    pub proto: RunRequest,
}

#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub ts: DateTime<Utc>,
    pub proto: Option<RunResponse>,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

/// One request/response exchange with the local application.
#[derive(Debug, Clone)]
pub struct RoundTrip {
    pub request: RequestRecord,
    pub response: Option<ResponseRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionCall {
    pub last_function: String,
    pub last_status: Option<Status>,
    pub last_error: Option<String>,

    pub failures: u32,
    pub polls: u32,

    pub running: bool,
    pub suspended: bool,
    pub done: bool,

    pub creation_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub done_time: Option<DateTime<Utc>>,

    pub children: HashSet<DispatchId>,
    pub ordered_children: Vec<DispatchId>,

    pub timeline: Vec<RoundTrip>,
}

/// Broad display category of a call, used to pick styles and icons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Pending,
    Suspended,
    Retrying,
    Ok,
    Error,
}

impl FunctionCall {
    pub fn function(&self) -> &str {
        if self.last_function.is_empty() {
            "(?)"
        } else {
            &self.last_function
        }
    }

    /// Number of attempts to display. Suspensions are not attempts, and a
    /// suspended call counts the upcoming resumption as a new attempt.
    pub fn attempt(&self) -> usize {
        let attempt = self.timeline.len().saturating_sub(self.polls as usize);
        if self.suspended {
            attempt + 1
        } else {
            attempt
        }
    }

    /// Wall-clock duration of the call, floored at zero and truncated to
    /// milliseconds. `None` until the call has been observed.
    pub fn duration(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let creation_time = self.creation_time?;
        let start = match self.timeline.first() {
            Some(rt) if creation_time < rt.request.ts => creation_time,
            Some(rt) => rt.request.ts,
            None => creation_time,
        };
        let end = if self.done {
            self.done_time.unwrap_or(now)
        } else {
            now
        };
        let millis = (end - start).num_milliseconds().max(0);
        Some(std::time::Duration::from_millis(millis as u64))
    }

    pub fn status_class(&self) -> StatusClass {
        if self.running {
            StatusClass::Pending
        } else if self.suspended {
            StatusClass::Suspended
        } else if self.done {
            if self.last_status == Some(Status::Ok) {
                StatusClass::Ok
            } else {
                StatusClass::Error
            }
        } else if self.failures > 0 {
            StatusClass::Retrying
        } else {
            StatusClass::Pending
        }
    }

    pub fn status_text(&self) -> String {
        if self.running {
            "Running".to_string()
        } else if self.suspended {
            "Suspended".to_string()
        } else if let Some(error) = &self.last_error {
            error.clone()
        } else if let Some(status) = self.last_status {
            dispatch_proto::status_string(status).to_string()
        } else {
            "Pending".to_string()
        }
    }

    /// Clears transient state while keeping the identity of the call: the
    /// hierarchy and the append-only timeline survive resets.
    fn reset(&mut self, function: String) {
        self.last_function = function;
        self.last_status = None;
        self.last_error = None;
        self.failures = 0;
        self.polls = 0;
        self.running = false;
        self.suspended = false;
        self.done = false;
        self.done_time = None;
    }
}

#[derive(Default)]
pub struct CallModel {
    roots: HashSet<DispatchId>,
    ordered_roots: Vec<DispatchId>,
    calls: HashMap<DispatchId, FunctionCall>,
}

impl CallModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn inflight(&self) -> usize {
        self.calls.values().filter(|call| !call.done).count()
    }

    pub fn ordered_roots(&self) -> &[DispatchId] {
        &self.ordered_roots
    }

    pub fn get(&self, id: &str) -> Option<&FunctionCall> {
        self.calls.get(id)
    }

    /// Ingests a request on its way to the local application.
    ///
    /// Idempotent upsert: re-observing an id revives the call (the upstream
    /// may legitimately re-issue a previously-terminal id on a resumed
    /// session). A not-yet-seen parent is created as a placeholder with no
    /// function name and no timeline; its own request fills it in later.
    pub fn observe_request(&mut self, now: DateTime<Utc>, request: &RunRequest) {
        let root_id = request.root_dispatch_id.clone();
        let parent_id = request.parent_dispatch_id.clone();
        let id = request.dispatch_id.clone();

        if self.roots.insert(root_id.clone()) {
            self.ordered_roots.push(root_id.clone());
        }
        self.calls.entry(root_id).or_default();

        let call = self.calls.entry(id.clone()).or_default();
        call.last_function = request.function.clone();
        call.running = true;
        call.suspended = false;
        if let Some(ts) = request.creation_time.as_ref().and_then(timestamp) {
            call.creation_time = Some(ts);
        }
        if call.creation_time.is_none() {
            call.creation_time = Some(now);
        }
        if let Some(ts) = request.expiration_time.as_ref().and_then(timestamp) {
            call.expiration_time = Some(ts);
        }
        call.timeline.push(RoundTrip {
            request: RequestRecord {
                ts: now,
                proto: request.clone(),
            },
            response: None,
        });

        if !parent_id.is_empty() && parent_id != id {
            let parent = self.calls.entry(parent_id).or_default();
            if parent.children.insert(id.clone()) {
                parent.ordered_children.push(id);
            }
        }
    }

    /// Ingests the outcome of forwarding the most recent request for the
    /// call. Always called after `observe_request` for a given exchange.
    pub fn observe_response(
        &mut self,
        now: DateTime<Utc>,
        request: &RunRequest,
        error: Option<&str>,
        http_status: Option<u16>,
        response: Option<&RunResponse>,
    ) {
        let Some(call) = self.calls.get_mut(&request.dispatch_id) else {
            return;
        };
        let Some(roundtrip) = call.timeline.last_mut() else {
            return;
        };
        roundtrip.response = Some(ResponseRecord {
            ts: now,
            proto: response.cloned(),
            http_status: if response.is_none() { http_status } else { None },
            error: error.map(String::from),
        });

        call.last_error = None;
        call.last_status = None;
        call.running = false;

        if let Some(response) = response {
            match response.status() {
                Status::Ok => {}
                Status::IncompatibleState => {
                    // The upstream restarts the call with fresh state.
                    let function = call.last_function.clone();
                    call.reset(function);
                }
                _ => call.failures += 1,
            }

            match &response.directive {
                Some(run_response::Directive::Exit(exit)) => {
                    call.last_status = Some(response.status());
                    call.done = terminal_status(response.status());
                    if let Some(tail_call) = &exit.tail_call {
                        call.reset(tail_call.function.clone());
                    } else if response.status() != Status::Ok {
                        if let Some(error) = exit.result.as_ref().and_then(|r| r.error.as_ref()) {
                            if !error.r#type.is_empty() {
                                call.last_error = Some(if error.message.is_empty() {
                                    error.r#type.clone()
                                } else {
                                    format!("{}: {}", error.r#type, error.message)
                                });
                            }
                        }
                    }
                }
                Some(run_response::Directive::Poll(_)) => {
                    call.suspended = true;
                    call.polls += 1;
                }
                None => {}
            }
        } else if let Some(code) = http_status {
            call.failures += 1;
            call.last_error = Some(format!("unexpected HTTP status code {code}"));
            call.done = terminal_http_status(code);
        } else if let Some(error) = error {
            call.failures += 1;
            call.last_error = Some(error.to_string());
        }

        if call.done && call.done_time.is_none() {
            call.done_time = Some(now);
        }
    }

    /// Marks calls whose expiration passed without completion as failed.
    /// Driven by the render tick.
    pub fn expire_overdue(&mut self, now: DateTime<Utc>) {
        for call in self.calls.values_mut() {
            if call.done {
                continue;
            }
            if let Some(expiration) = call.expiration_time {
                if expiration < now {
                    call.running = false;
                    call.suspended = false;
                    call.done = true;
                    call.last_error = Some("Expired".to_string());
                    call.done_time = Some(expiration);
                }
            }
        }
    }
}

fn timestamp(ts: &prost_types::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_proto::{any_string, run_request, Call, CallResult, Error, Exit, Poll, PollResult};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn request(id: &str, root: &str, parent: &str, function: &str) -> RunRequest {
        RunRequest {
            function: function.to_string(),
            dispatch_id: id.to_string(),
            parent_dispatch_id: parent.to_string(),
            root_dispatch_id: root.to_string(),
            creation_time: None,
            expiration_time: None,
            directive: Some(run_request::Directive::Input(any_string("x"))),
        }
    }

    fn poll_result_request(id: &str, root: &str, function: &str) -> RunRequest {
        RunRequest {
            directive: Some(run_request::Directive::PollResult(PollResult::default())),
            ..request(id, root, "", function)
        }
    }

    fn exit_response(status: Status) -> RunResponse {
        RunResponse {
            status: status as i32,
            directive: Some(run_response::Directive::Exit(Exit::default())),
        }
    }

    fn exit_error_response(status: Status, r#type: &str, message: &str) -> RunResponse {
        RunResponse {
            status: status as i32,
            directive: Some(run_response::Directive::Exit(Exit {
                result: Some(CallResult {
                    error: Some(Error {
                        r#type: r#type.to_string(),
                        message: message.to_string(),
                    }),
                    ..Default::default()
                }),
                tail_call: None,
            })),
        }
    }

    fn tail_call_response(function: &str) -> RunResponse {
        RunResponse {
            status: Status::Ok as i32,
            directive: Some(run_response::Directive::Exit(Exit {
                result: None,
                tail_call: Some(Call {
                    function: function.to_string(),
                    ..Default::default()
                }),
            })),
        }
    }

    fn poll_response() -> RunResponse {
        RunResponse {
            status: Status::Ok as i32,
            directive: Some(run_response::Directive::Poll(Poll::default())),
        }
    }

    #[test]
    fn links_roots_parents_and_children_exactly_once() {
        let mut model = CallModel::new();
        model.observe_request(ts(0), &request("root", "root", "", "main"));
        model.observe_request(ts(1), &request("child", "root", "root", "sub"));
        model.observe_request(ts(2), &request("child", "root", "root", "sub"));

        assert_eq!(model.ordered_roots(), ["root".to_string()]);
        let root = model.get("root").unwrap();
        assert_eq!(root.ordered_children, ["child".to_string()]);
        assert!(root.children.contains("child"));
        assert!(model.get("child").is_some());
    }

    #[test]
    fn child_before_parent_creates_placeholder() {
        let mut model = CallModel::new();
        model.observe_request(ts(0), &request("grandchild", "root", "middle", "leaf"));

        let placeholder = model.get("middle").unwrap();
        assert_eq!(placeholder.function(), "(?)");
        assert!(placeholder.timeline.is_empty());
        assert_eq!(placeholder.ordered_children, ["grandchild".to_string()]);

        // The parent's own request fills in the placeholder.
        model.observe_request(ts(1), &request("middle", "root", "root", "mid"));
        let middle = model.get("middle").unwrap();
        assert_eq!(middle.function(), "mid");
        assert_eq!(middle.timeline.len(), 1);
        assert_eq!(middle.ordered_children, ["grandchild".to_string()]);
    }

    #[test]
    fn timeline_grows_per_request_and_response_timestamps_follow() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "f");
        model.observe_request(ts(0), &req);
        model.observe_response(ts(1), &req, None, Some(200), Some(&exit_response(Status::Ok)));

        let call = model.get("a").unwrap();
        assert_eq!(call.timeline.len(), 1);
        let rt = &call.timeline[0];
        assert!(rt.response.as_ref().unwrap().ts >= rt.request.ts);
    }

    #[test]
    fn happy_path_single_exchange() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "greet");
        model.observe_request(ts(0), &req);
        model.observe_response(ts(1), &req, None, Some(200), Some(&exit_response(Status::Ok)));

        let call = model.get("a").unwrap();
        assert!(call.done);
        assert!(!call.running);
        assert_eq!(call.last_status, Some(Status::Ok));
        assert_eq!(call.failures, 0);
        assert_eq!(call.timeline.len(), 1);
        assert_eq!(call.done_time, Some(ts(1)));
    }

    #[test]
    fn terminal_exit_then_reused_id_revives_the_call() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "f");
        model.observe_request(ts(0), &req);
        model.observe_response(ts(1), &req, None, Some(200), Some(&exit_response(Status::Ok)));
        assert!(model.get("a").unwrap().done);

        // A resumed session may re-issue a previously observed id.
        model.observe_request(ts(2), &req);
        let call = model.get("a").unwrap();
        assert!(call.running);
        assert_eq!(call.timeline.len(), 2);
        // done_time is only ever set on the transition into done.
        assert_eq!(call.done_time, Some(ts(1)));
    }

    #[test]
    fn retryable_failure_then_success() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "flaky");
        model.observe_request(ts(0), &req);
        model.observe_response(
            ts(1),
            &req,
            None,
            Some(200),
            Some(&exit_response(Status::TemporaryError)),
        );

        {
            let call = model.get("a").unwrap();
            assert_eq!(call.failures, 1);
            assert!(!call.done);
            assert_eq!(call.last_status, Some(Status::TemporaryError));
        }

        let resume = poll_result_request("a", "a", "flaky");
        model.observe_request(ts(2), &resume);
        model.observe_response(ts(3), &resume, None, Some(200), Some(&exit_response(Status::Ok)));

        let call = model.get("a").unwrap();
        assert!(call.done);
        assert_eq!(call.failures, 1);
        assert_eq!(call.timeline.len(), 2);
        assert_eq!(call.attempt(), 2);
    }

    #[test]
    fn failed_exit_captures_error_type_and_message() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "f");
        model.observe_request(ts(0), &req);
        model.observe_response(
            ts(1),
            &req,
            None,
            Some(200),
            Some(&exit_error_response(
                Status::PermanentError,
                "ValueError",
                "bad input",
            )),
        );

        let call = model.get("a").unwrap();
        assert!(call.done);
        assert_eq!(call.last_error.as_deref(), Some("ValueError: bad input"));
    }

    #[test]
    fn tail_call_resets_transient_state_but_keeps_timeline() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "a_fn");
        model.observe_request(ts(0), &req);
        model.observe_response(
            ts(1),
            &req,
            None,
            Some(200),
            Some(&exit_response(Status::TemporaryError)),
        );
        model.observe_request(ts(2), &req);
        model.observe_response(ts(3), &req, None, Some(200), Some(&tail_call_response("b_fn")));

        let call = model.get("a").unwrap();
        assert_eq!(call.function(), "b_fn");
        assert_eq!(call.failures, 0);
        assert!(!call.done);
        assert!(call.last_status.is_none());
        // The timeline is append-only; a tail call never truncates it, so
        // the displayed attempt count stays monotone.
        assert_eq!(call.timeline.len(), 2);
    }

    #[test]
    fn incompatible_state_resets_keeping_function_name() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "f");
        model.observe_request(ts(0), &req);
        model.observe_response(
            ts(1),
            &req,
            None,
            Some(200),
            Some(&exit_response(Status::IncompatibleState)),
        );

        let call = model.get("a").unwrap();
        assert_eq!(call.function(), "f");
        assert_eq!(call.failures, 0);
        assert!(!call.done);
        assert_eq!(call.last_status, Some(Status::IncompatibleState));
    }

    #[test]
    fn poll_suspends_and_next_request_resumes() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "f");
        model.observe_request(ts(0), &req);
        model.observe_response(ts(1), &req, None, Some(200), Some(&poll_response()));

        {
            let call = model.get("a").unwrap();
            assert!(call.suspended);
            assert!(!call.running);
            assert_eq!(call.polls, 1);
            // The upcoming resumption counts as a new attempt.
            assert_eq!(call.attempt(), 1);
        }

        let resume = poll_result_request("a", "a", "f");
        model.observe_request(ts(2), &resume);
        let call = model.get("a").unwrap();
        assert!(call.running);
        assert!(!call.suspended);
        assert_eq!(call.timeline.len(), 2);
    }

    #[test]
    fn attempt_is_monotone_across_a_long_exchange() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "f");
        let mut last_attempt = 0;
        let mut check = |model: &CallModel| {
            let attempt = model.get("a").unwrap().attempt();
            assert!(attempt >= last_attempt, "attempt went backwards");
            last_attempt = attempt;
        };

        model.observe_request(ts(0), &req);
        check(&model);
        model.observe_response(ts(1), &req, None, Some(200), Some(&poll_response()));
        check(&model);
        model.observe_request(ts(2), &poll_result_request("a", "a", "f"));
        check(&model);
        model.observe_response(
            ts(3),
            &req,
            None,
            Some(200),
            Some(&exit_response(Status::TemporaryError)),
        );
        check(&model);
        model.observe_request(ts(4), &req);
        check(&model);
        model.observe_response(ts(5), &req, None, Some(200), Some(&exit_response(Status::Ok)));
        check(&model);
    }

    #[test]
    fn unexpected_http_status_uses_terminal_table() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "f");
        model.observe_request(ts(0), &req);
        model.observe_response(ts(1), &req, None, Some(500), None);

        {
            let call = model.get("a").unwrap();
            assert_eq!(call.failures, 1);
            assert!(!call.done);
            assert_eq!(
                call.last_error.as_deref(),
                Some("unexpected HTTP status code 500")
            );
        }

        model.observe_request(ts(2), &req);
        model.observe_response(ts(3), &req, None, Some(404), None);
        let call = model.get("a").unwrap();
        assert!(call.done);
        assert_eq!(call.failures, 2);
    }

    #[test]
    fn transport_error_counts_as_failure() {
        let mut model = CallModel::new();
        let req = request("a", "a", "", "f");
        model.observe_request(ts(0), &req);
        model.observe_response(ts(1), &req, Some("connection refused"), None, None);

        let call = model.get("a").unwrap();
        assert_eq!(call.failures, 1);
        assert!(!call.done);
        assert_eq!(call.last_error.as_deref(), Some("connection refused"));
        assert_eq!(call.status_class(), StatusClass::Retrying);
    }

    #[test]
    fn expiration_marks_call_failed_at_expiry_time() {
        let mut model = CallModel::new();
        let mut req = request("a", "a", "", "f");
        req.expiration_time = Some(prost_types::Timestamp {
            seconds: ts(5).timestamp(),
            nanos: 0,
        });
        model.observe_request(ts(0), &req);

        // Before the deadline nothing happens.
        model.expire_overdue(ts(4));
        assert!(!model.get("a").unwrap().done);

        model.expire_overdue(ts(6));
        let call = model.get("a").unwrap();
        assert!(call.done);
        assert!(!call.running);
        assert_eq!(call.last_error.as_deref(), Some("Expired"));
        assert_eq!(call.done_time, Some(ts(5)));
        assert_eq!(call.status_class(), StatusClass::Error);
    }

    #[test]
    fn duration_floors_at_zero_and_stops_at_done_time() {
        let mut model = CallModel::new();
        let mut req = request("a", "a", "", "f");
        req.creation_time = Some(prost_types::Timestamp {
            seconds: ts(0).timestamp(),
            nanos: 0,
        });
        model.observe_request(ts(1), &req);
        model.observe_response(ts(3), &req, None, Some(200), Some(&exit_response(Status::Ok)));

        let call = model.get("a").unwrap();
        // Starts at the earlier of creation time and first request.
        assert_eq!(
            call.duration(ts(60)),
            Some(std::time::Duration::from_secs(3))
        );
    }
}
