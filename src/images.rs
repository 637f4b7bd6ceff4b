//! Text-to-image generation: submit a job to the backend, then poll for the
//! result until the image URLs appear or the deadline passes.

use std::time::Duration;

use crate::backend::BackendClient;
use crate::error::{ProxyError, Result};
use crate::translate::backend_types::{
    ImageEnvelope, ImageJob, ImageJobRequest, ImagePollData, ImagePollRequest,
};
use crate::translate::openai_types::{ImageData, ImageGenerationRequest, ImageGenerationResponse};

pub const DEFAULT_MODEL: &str = "dall-e-3";
pub const DEFAULT_SIZE: &str = "1024x1024";
const MODEL_TYPE: &str = "sdxl";
const TASK_TYPE: &str = "text_to_image";

/// Map an OpenAI image size onto the backend's aspect ratio.
pub fn size_to_aspect_ratio(size: &str) -> &'static str {
    match size {
        "1792x1024" => "16:9",
        "1024x1792" => "9:16",
        _ => "1:1",
    }
}

/// Fill in defaults and reject an empty prompt.
pub fn normalize(mut req: ImageGenerationRequest) -> Result<ImageGenerationRequest> {
    if req.prompt.trim().is_empty() {
        return Err(ProxyError::EmptyPrompt);
    }
    if req.model.is_empty() {
        req.model = DEFAULT_MODEL.to_string();
    }
    if req.n == 0 {
        req.n = 1;
    }
    if req.size.is_empty() {
        req.size = DEFAULT_SIZE.to_string();
    }
    Ok(req)
}

pub fn job_request(req: &ImageGenerationRequest) -> ImageJobRequest {
    ImageJobRequest {
        task_uid: uuid::Uuid::new_v4().to_string(),
        image_count: req.n,
        prompt: req.prompt.clone(),
        model_type: MODEL_TYPE.to_string(),
        aspect_ratio: size_to_aspect_ratio(&req.size).to_string(),
        task_type: TASK_TYPE.to_string(),
    }
}

/// How long to keep polling: twice the backend's estimate, and never less
/// than one poll interval.
pub fn poll_deadline(expected_secs: u64, poll_interval: Duration) -> Duration {
    Duration::from_secs(expected_secs.saturating_mul(2)).max(poll_interval)
}

fn into_data<T>(envelope: ImageEnvelope<T>) -> Result<Option<T>> {
    if envelope.code != 0 {
        return Err(ProxyError::image_generation(format!(
            "backend code {}: {}",
            envelope.code, envelope.msg
        )));
    }
    Ok(envelope.data)
}

pub async fn generate_image(
    client: &BackendClient,
    req: ImageGenerationRequest,
    poll_interval: Duration,
) -> Result<ImageGenerationResponse> {
    let req = normalize(req)?;

    let submitted: ImageEnvelope<ImageJob> = client
        .post_json(client.image_generate_url(), &job_request(&req))
        .await?;
    let job = into_data(submitted)?
        .ok_or_else(|| ProxyError::image_generation("backend returned no job"))?;

    tracing::info!(
        image_tools_id = job.image_tools_id,
        expected_time = job.expected_time,
        model = %req.model,
        "image job submitted"
    );

    let deadline = poll_deadline(job.expected_time, poll_interval);
    let urls = tokio::time::timeout(
        deadline,
        poll_until_ready(client, job.image_tools_id, poll_interval),
    )
    .await
    .map_err(|_| {
        ProxyError::timeout(format!(
            "image {} not ready after {}s",
            job.image_tools_id,
            deadline.as_secs()
        ))
    })??;

    Ok(ImageGenerationResponse {
        created: chrono::Utc::now().timestamp(),
        data: urls
            .into_iter()
            .map(|url| ImageData {
                url,
                revised_prompt: Some(req.prompt.clone()),
            })
            .collect(),
    })
}

async fn poll_until_ready(
    client: &BackendClient,
    image_tools_id: i64,
    poll_interval: Duration,
) -> Result<Vec<String>> {
    let body = ImagePollRequest { image_tools_id };

    loop {
        let polled: ImageEnvelope<ImagePollData> =
            client.post_json(client.image_result_url(), &body).await?;

        if let Some(data) = into_data(polled)? {
            let urls = data.record.result.cdn_url_list;
            if !urls.is_empty() {
                return Ok(urls);
            }
        }

        tracing::debug!(image_tools_id, "image not ready yet");
        tokio::time::sleep(poll_interval).await;
    }
}
