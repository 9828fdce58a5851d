//! Chat-completion client (OpenAI-compatible API).

use serde::{Deserialize, Serialize};

use super::{ClientError, check_status, endpoint};

#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: url::Url,
    api_key: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            base_url: super::parse_base_url(base_url)?,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Run one chat completion and return the first choice's content.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ClientError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature,
        };

        let resp = self
            .http
            .post(endpoint(&self.base_url, "chat/completions")?)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let body: ChatResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("chat/completions: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ClientError::Decode("chat/completions: empty content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-test",
                "max_tokens": 2000
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#)
            .create_async()
            .await;

        let client = LlmClient::new(reqwest::Client::new(), &server.url(), "sk-test", "gpt-test").unwrap();
        let content = client
            .complete(&[ChatMessage::user("hi")], 2000, 0.8)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn test_empty_content_is_an_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let client = LlmClient::new(reqwest::Client::new(), &server.url(), "sk-test", "gpt-test").unwrap();
        let err = client.complete(&[ChatMessage::user("hi")], 10, 0.0).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }
}
