use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{CostModel, Describer, FrameDescription};
use crate::config::{DEFAULT_API_BASE, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, JPEG_QUALITY};
use crate::error::DescribeError;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Encode a frame as a base64 JPEG data URL.
pub fn frame_data_url(image: &RgbImage) -> Result<String, image::ImageError> {
    let mut jpeg = Vec::new();
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY))?;
    debug!(bytes = jpeg.len(), "encoded frame as jpeg");
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&jpeg)))
}

/// Client for an OpenAI-compatible chat completions endpoint with vision input.
pub struct OpenAiVisionClient {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    cost: CostModel,
}

impl OpenAiVisionClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, DescribeError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            cost: CostModel::default(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn build_request<'a>(&'a self, prompt: &'a str, data_url: String) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
        }
    }
}

fn parse_completion(
    response: ChatResponse,
    cost: &CostModel,
) -> Result<FrameDescription, DescribeError> {
    let description = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(DescribeError::EmptyResponse)?;

    let (input_tokens, output_tokens) = match response.usage {
        Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
        None => {
            warn!("response carried no usage, cost recorded as zero");
            (0, 0)
        }
    };

    Ok(FrameDescription {
        description,
        cost_usd: cost.cost(input_tokens, output_tokens),
        input_tokens,
        output_tokens,
    })
}

impl Describer for OpenAiVisionClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn describe(&self, image: &RgbImage, prompt: &str) -> Result<FrameDescription, DescribeError> {
        let data_url = frame_data_url(image)?;
        let request = self.build_request(prompt, data_url);

        info!(
            model = %self.model,
            width = image.width(),
            height = image.height(),
            "requesting frame description"
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            error!(status = status.as_u16(), %body, "description request rejected");
            return Err(DescribeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result = parse_completion(response.json::<ChatResponse>()?, &self.cost)?;
        info!(
            input_tokens = result.input_tokens,
            output_tokens = result.output_tokens,
            cost_usd = result.cost_usd,
            "frame described"
        );
        Ok(result)
    }
}
