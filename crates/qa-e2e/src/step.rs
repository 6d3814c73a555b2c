//! Workflow model: scenarios made of steps, steps made of calls and polls.

use std::collections::BTreeSet;
use std::time::Duration;

use qa_core::{ApiKey, Method, QaError, QaResult};
use serde_json::Value;

use crate::expect::Expect;
use crate::template::{references, value_references, Vars};

/// One request with its expectations and extractions.
#[derive(Debug, Clone)]
pub struct Call {
    pub label: Option<String>,
    /// Service key in the `services` configuration section
    pub service: String,
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub api_key: ApiKey,
    pub expect: Vec<Expect>,
    /// (variable, JSON pointer) pairs read from a passing response
    pub extract: Vec<(String, String)>,
}

impl Call {
    pub fn new(method: Method, service: &str, path: &str) -> Self {
        Self {
            label: None,
            service: service.to_string(),
            method,
            path: path.to_string(),
            body: None,
            api_key: ApiKey::Configured,
            expect: Vec::new(),
            extract: Vec::new(),
        }
    }

    pub fn get(service: &str, path: &str) -> Self {
        Self::new(Method::GET, service, path)
    }

    pub fn post(service: &str, path: &str) -> Self {
        Self::new(Method::POST, service, path)
    }

    pub fn patch(service: &str, path: &str) -> Self {
        Self::new(Method::PATCH, service, path)
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn without_key(mut self) -> Self {
        self.api_key = ApiKey::Omit;
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: &str) -> Self {
        self.api_key = ApiKey::Override(key.to_string());
        self
    }

    #[must_use]
    pub fn status(self, code: u16) -> Self {
        self.expect(Expect::Status(code))
    }

    #[must_use]
    pub fn expect(mut self, expect: Expect) -> Self {
        self.expect.push(expect);
        self
    }

    /// Require every pointer to be present.
    #[must_use]
    pub fn has(mut self, pointers: &[&str]) -> Self {
        self.expect
            .extend(pointers.iter().map(|p| Expect::Present((*p).to_string())));
        self
    }

    #[must_use]
    pub fn equals(self, pointer: &str, value: Value) -> Self {
        self.expect(Expect::Equals(pointer.to_string(), value))
    }

    #[must_use]
    pub fn extract(mut self, var: &str, pointer: &str) -> Self {
        self.extract.push((var.to_string(), pointer.to_string()));
        self
    }

    /// Label used in assertion logs.
    pub fn title(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("{} {}", self.method, self.path),
        }
    }

    /// Variables the call needs before it can be sent.
    pub fn references(&self) -> Vec<String> {
        let mut refs = references(&self.path);
        if let Some(body) = &self.body {
            refs.extend(value_references(body));
        }
        for expect in &self.expect {
            if let Expect::Equals(_, value) = expect {
                refs.extend(value_references(value));
            }
        }
        refs
    }
}

/// What to do when a poll runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnExhausted {
    /// Fail the step with a poll timeout
    #[default]
    Fail,
    /// Note it and carry on; the step can still pass
    Tolerate,
}

/// Repeat a call until a predicate over its response holds. The call's own
/// expectations are checked once, on the satisfying response.
#[derive(Debug, Clone)]
pub struct Poll {
    pub call: Call,
    pub until: Vec<Expect>,
    /// Defaults to the executor's configured attempts when unset
    pub max_attempts: Option<u32>,
    pub interval: Option<Duration>,
    pub on_exhausted: OnExhausted,
}

impl Poll {
    pub fn new(call: Call, until: Vec<Expect>) -> Self {
        Self {
            call,
            until,
            max_attempts: None,
            interval: None,
            on_exhausted: OnExhausted::Fail,
        }
    }

    #[must_use]
    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    #[must_use]
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    #[must_use]
    pub fn tolerate_timeout(mut self) -> Self {
        self.on_exhausted = OnExhausted::Tolerate;
        self
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    Call(Call),
    Poll(Poll),
}

impl Action {
    pub fn call(&self) -> &Call {
        match self {
            Self::Call(call) => call,
            Self::Poll(poll) => &poll.call,
        }
    }

    fn references(&self) -> Vec<String> {
        let mut refs = self.call().references();
        if let Self::Poll(poll) = self {
            for expect in &poll.until {
                if let Expect::Equals(_, value) = expect {
                    refs.extend(value_references(value));
                }
            }
        }
        refs
    }
}

impl From<Call> for Action {
    fn from(call: Call) -> Self {
        Self::Call(call)
    }
}

impl From<Poll> for Action {
    fn from(poll: Poll) -> Self {
        Self::Poll(poll)
    }
}

/// Named group of actions. Actions run in order and the step stops at the
/// first failing one.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    /// Exercises a rejection path (malformed input, missing auth)
    pub negative: bool,
    pub actions: Vec<Action>,
}

impl Step {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            negative: false,
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn negative(mut self) -> Self {
        self.negative = true;
        self
    }

    #[must_use]
    pub fn then(mut self, action: impl Into<Action>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Variables the step needs that neither `vars` nor an earlier action
    /// of the step provides, in first-use order.
    pub fn missing_vars(&self, vars: &Vars) -> Vec<String> {
        let mut produced: BTreeSet<&str> = BTreeSet::new();
        let mut missing = Vec::new();

        for action in &self.actions {
            for name in action.references() {
                if !vars.contains_key(&name) && !produced.contains(name.as_str()) && !missing.contains(&name) {
                    missing.push(name);
                }
            }
            produced.extend(action.call().extract.iter().map(|(var, _)| var.as_str()));
        }
        missing
    }
}

/// Ordered list of steps sharing one variable set and one correlation id.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            steps,
        }
    }

    /// Structural checks run before any request is sent.
    pub fn validate(&self) -> QaResult<()> {
        if self.steps.is_empty() {
            return Err(QaError::validation(format!("scenario `{}` has no steps", self.name)));
        }
        if !self.steps.iter().any(|s| s.negative) {
            return Err(QaError::validation(format!(
                "scenario `{}` has no negative-path step",
                self.name
            )));
        }

        let mut names = BTreeSet::new();
        for step in &self.steps {
            if step.actions.is_empty() {
                return Err(QaError::validation(format!("step `{}` has no actions", step.name)));
            }
            if !names.insert(step.name.as_str()) {
                return Err(QaError::validation(format!("duplicate step name `{}`", step.name)));
            }
        }
        Ok(())
    }
}
