//! Prompt construction and reply extraction.

use serde::Serialize;

use crate::error::{GenerationError, ServiceResult};
use crate::generation::Tokenizer;
use crate::retrieval::ContextBlock;

const DIRECTIVE: &str =
    "You are a helpful assistant. Use ONLY the following information and include source links:";
const CONCISE_DIRECTIVE: &str = "Be concise and answer in at most 5 lines.";

/// Token accounting for one exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Builds two-turn chat prompts in the Phi-3 instruct format
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAssembler {
    concise: bool,
}

impl PromptAssembler {
    pub fn new(concise: bool) -> Self {
        Self { concise }
    }

    /// Chunks as `text\nSource: link`, separated by blank lines
    pub fn serialize_context(block: &ContextBlock) -> String {
        block
            .chunks
            .iter()
            .map(|chunk| match &chunk.source {
                Some(link) => format!("{}\nSource: {}", chunk.text, link),
                None => chunk.text.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn assemble(&self, query: &str, block: &ContextBlock) -> String {
        let mut system = String::from(DIRECTIVE);
        if self.concise {
            system.push('\n');
            system.push_str(CONCISE_DIRECTIVE);
        }
        system.push_str("\n\n");
        system.push_str(&Self::serialize_context(block));

        format!(
            "<|system|>\n{}<|end|>\n<|user|>\n{}<|end|>\n<|assistant|>\n",
            system, query
        )
    }

    /// The completion that follows the echoed prompt.
    ///
    /// Output that does not start with the prompt breaks the generation
    /// contract and is reported as a format error.
    pub fn parse_reply(raw: &str, prompt: &str) -> Result<String, GenerationError> {
        raw.strip_prefix(prompt)
            .map(|reply| reply.trim().to_string())
            .ok_or_else(|| GenerationError::Format {
                message: "generation output does not start with the prompt".to_string(),
            })
    }

    /// Three independent tokenizer calls; the total is not derived from the parts
    pub async fn usage(
        tokenizer: &dyn Tokenizer,
        prompt: &str,
        reply: &str,
    ) -> ServiceResult<Usage> {
        let prompt_tokens = tokenizer.count_tokens(prompt).await?;
        let completion_tokens = tokenizer.count_tokens(reply).await?;
        let total_tokens = tokenizer.count_tokens(&format!("{}{}", prompt, reply)).await?;

        Ok(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::test_support::WordTokenizer;
    use crate::retrieval::ContextChunk;

    fn block() -> ContextBlock {
        ContextBlock::new(vec![
            ContextChunk {
                text: "Tokio is an async runtime.".into(),
                source: Some("https://tokio.rs".into()),
            },
            ContextChunk {
                text: "Local page text".into(),
                source: None,
            },
        ])
    }

    #[test]
    fn test_assemble_layout() {
        let prompt = PromptAssembler::new(false).assemble("What is tokio?", &block());
        assert_eq!(
            prompt,
            "<|system|>\nYou are a helpful assistant. Use ONLY the following information and include source links:\n\n\
             Tokio is an async runtime.\nSource: https://tokio.rs\n\nLocal page text<|end|>\n\
             <|user|>\nWhat is tokio?<|end|>\n<|assistant|>\n"
        );
    }

    #[test]
    fn test_concise_directive() {
        let prompt = PromptAssembler::new(true).assemble("q", &block());
        assert!(prompt.contains("source links:\nBe concise and answer in at most 5 lines.\n\n"));
    }

    #[test]
    fn test_parse_reply_strips_prompt() {
        let prompt = PromptAssembler::default().assemble("q", &block());
        let raw = format!("{}answer text", prompt);
        assert_eq!(PromptAssembler::parse_reply(&raw, &prompt).unwrap(), "answer text");
    }

    #[test]
    fn test_parse_reply_without_prompt_is_format_error() {
        let err = PromptAssembler::parse_reply("answer text", "prompt").unwrap_err();
        assert!(matches!(err, GenerationError::Format { .. }));
    }

    #[tokio::test]
    async fn test_usage_counts_three_times() {
        // WordTokenizer adds one per call, so the total is not the sum of the parts
        let usage = PromptAssembler::usage(&WordTokenizer, "one two", " three")
            .await
            .unwrap();
        assert_eq!(
            usage,
            Usage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 4,
            }
        );
    }
}
