use crate::llm::{ChatTurn, LlmClient};
use std::collections::VecDeque;
use std::sync::Arc;

/// Exchanges kept per agent. Older exchanges are evicted so a long run cannot
/// grow a role's context without bound.
pub const HISTORY_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

/// A specialized text-generation role: one instruction plus a bounded ring of
/// recent exchanges, replayed as conversation history on every call.
#[derive(Debug)]
pub struct Agent {
    name: String,
    instruction: String,
    history: VecDeque<Exchange>,
    capacity: usize,
    llm: Arc<dyn LlmClient>,
}

impl Agent {
    pub fn new(llm: Arc<dyn LlmClient>, name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self::with_capacity(llm, name, instruction, HISTORY_CAPACITY)
    }

    pub fn with_capacity(
        llm: Arc<dyn LlmClient>,
        name: impl Into<String>,
        instruction: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            history: VecDeque::with_capacity(capacity),
            capacity,
            llm,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Sends the instruction, trailing history and `input` as one completion
    /// request. Backend failures come back as error text rather than an Err:
    /// downstream parsing treats them like any other malformed output, so a
    /// flaky backend degrades a single step instead of killing the run.
    pub async fn invoke(&mut self, input: &str) -> String {
        let mut turns = Vec::with_capacity(self.history.len() * 2 + 1);
        for exchange in &self.history {
            turns.push(ChatTurn::user(exchange.input.clone()));
            turns.push(ChatTurn::assistant(exchange.output.clone()));
        }
        turns.push(ChatTurn::user(input));

        log::debug!("[{}] request ({} chars)", self.name, input.len());

        match self.llm.chat(&self.instruction, &turns).await {
            Ok(output) => {
                if self.history.len() == self.capacity {
                    self.history.pop_front();
                }
                self.history.push_back(Exchange {
                    input: input.to_string(),
                    output: output.clone(),
                });
                log::debug!("[{}] response ({} chars)", self.name, output.len());
                output
            }
            Err(e) => {
                log::error!("[{}] completion failed: {e:#}", self.name);
                format!("Error in completion: {e:#}")
            }
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
        log::debug!("[{}] history cleared", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct EchoLlm {
        seen_turns: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn chat(&self, _system: &str, turns: &[ChatTurn]) -> Result<String> {
            self.seen_turns.lock().unwrap().push(turns.len());
            Ok(format!("echo: {}", turns.last().unwrap().content))
        }
    }

    #[derive(Debug)]
    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn chat(&self, _system: &str, _turns: &[ChatTurn]) -> Result<String> {
            Err(anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn history_grows_and_is_replayed() {
        let llm = Arc::new(EchoLlm {
            seen_turns: Mutex::new(Vec::new()),
        });
        let mut agent = Agent::new(llm.clone(), "Writer", "You write.");

        assert_eq!(agent.invoke("one").await, "echo: one");
        assert_eq!(agent.invoke("two").await, "echo: two");
        assert_eq!(agent.history_len(), 2);

        // second call carries the first exchange as two turns plus the input
        assert_eq!(*llm.seen_turns.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let llm = Arc::new(EchoLlm {
            seen_turns: Mutex::new(Vec::new()),
        });
        let mut agent = Agent::with_capacity(llm, "Writer", "You write.", 2);

        for i in 0..5 {
            agent.invoke(&format!("input {i}")).await;
        }
        assert_eq!(agent.history_len(), 2);
    }

    #[tokio::test]
    async fn backend_failure_becomes_error_text() {
        let mut agent = Agent::new(Arc::new(FailingLlm), "Writer", "You write.");

        let output = agent.invoke("anything").await;
        assert!(output.starts_with("Error in completion:"));
        assert!(output.contains("connection refused"));
        // failed exchanges are not recorded
        assert_eq!(agent.history_len(), 0);
    }

    #[tokio::test]
    async fn clear_resets_history() {
        let llm = Arc::new(EchoLlm {
            seen_turns: Mutex::new(Vec::new()),
        });
        let mut agent = Agent::new(llm, "Writer", "You write.");
        agent.invoke("one").await;
        agent.clear();
        assert_eq!(agent.history_len(), 0);
    }
}
