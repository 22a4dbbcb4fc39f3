use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use chippy_core::errors::CompletionError;
use chippy_core::provider::{image_filename, ImageGenerator, ImageSize};
use chippy_core::Attachment;

use crate::openai::{error_from_response, http_client, OpenAiConfig};

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: String,
    response_format: &'static str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

/// Image generation through the OpenAI images endpoint. The image is
/// returned inline (base64) so no second download is needed.
pub struct OpenAiImageGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiImageGenerator {
    /// `config.model` is the image model, e.g. `dall-e-2`.
    pub fn new(config: OpenAiConfig) -> Result<Self, CompletionError> {
        Ok(Self {
            client: http_client()?,
            config,
        })
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    #[instrument(skip(self, prompt), fields(size = %size.dimensions()))]
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<Attachment, CompletionError> {
        let body = ImageRequest {
            model: &self.config.model,
            prompt,
            n: 1,
            size: size.dimensions(),
            response_format: "b64_json",
        };

        let resp = self
            .client
            .post(self.config.endpoint("images/generations"))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let parsed: ImageResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

        let encoded = parsed
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| CompletionError::MalformedResponse("no image in response".into()))?;

        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| CompletionError::MalformedResponse(format!("image payload: {e}")))?;

        info!(bytes = bytes.len(), "image generated");
        Ok(Attachment::png(image_filename(prompt), bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer) -> OpenAiImageGenerator {
        let config = OpenAiConfig::new(SecretString::from("sk-test".to_string()), "dall-e-2")
            .with_base_url(server.uri());
        OpenAiImageGenerator::new(config).unwrap()
    }

    #[tokio::test]
    async fn decodes_inline_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(body_partial_json(json!({"size": "512x512", "n": 1, "response_format": "b64_json"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"b64_json": STANDARD.encode(b"\x89PNG fake")}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let attachment = generator(&server)
            .generate("image of a Dog", ImageSize::Medium)
            .await
            .unwrap();
        assert_eq!(attachment.filename, "image_of_a_dog.png");
        assert_eq!(attachment.mime_type, "image/png");
        assert_eq!(attachment.data, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn bad_base64_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"b64_json": "***"}]
            })))
            .mount(&server)
            .await;

        let err = generator(&server)
            .generate("image of nothing", ImageSize::Small)
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = generator(&server)
            .generate("image of a cat", ImageSize::Large)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
