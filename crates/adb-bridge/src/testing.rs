//! Scripted adb bridge for tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adb::{AdbError, AdbRunner};

type Responder = dyn Fn(&[String]) -> Result<String, AdbError> + Send + Sync;

/// Answers every invocation from a closure and records the arguments.
pub struct ScriptedAdb {
    responder: Box<Responder>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedAdb {
    pub fn new(
        responder: impl Fn(&[String]) -> Result<String, AdbError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every invocation so far, in call order
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Number of invocations whose arguments start with `prefix`
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|args| {
                args.len() >= prefix.len() && args.iter().zip(prefix).all(|(a, p)| a == p)
            })
            .count()
    }
}

#[async_trait]
impl AdbRunner for ScriptedAdb {
    async fn execute(&self, args: &[String]) -> Result<String, AdbError> {
        self.calls.lock().push(args.to_vec());
        (self.responder)(args)
    }
}
