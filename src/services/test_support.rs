//! Hand-written collaborator doubles shared by the service tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::state::{ChannelType, ReferenceThumbnail};
use crate::services::channel::{ChannelFetcher, ChannelInfo};
use crate::services::llm::LlmClient;
use crate::services::persistence::{ThumbnailRecord, ThumbnailStore};
use crate::services::synthesis::{ImageSynthesizer, SynthesisRequest};

pub const EXTRACT_MARK: &str = "【個別分析】";
pub const CLUSTER_MARK: &str = "【パターン抽出】";
pub const SUGGEST_MARK: &str = "【素材提案】";

#[derive(Debug, Clone)]
pub struct LlmCall {
    pub user: String,
    pub image_urls: Vec<String>,
}

/// Answers by the first rule whose marker appears in the user prompt.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    rules: Vec<(String, std::result::Result<String, String>)>,
    calls: Mutex<Vec<LlmCall>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, marker: &str, response: &str) -> Self {
        self.rules.push((marker.to_string(), Ok(response.to_string())));
        self
    }

    pub fn fail(mut self, marker: &str, message: &str) -> Self {
        self.rules.push((marker.to_string(), Err(message.to_string())));
        self
    }

    pub fn calls(&self) -> Vec<LlmCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_containing(&self, marker: &str) -> usize {
        self.calls().iter().filter(|c| c.user.contains(marker)).count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _system: &str, user: &str, image_urls: &[String]) -> Result<String> {
        self.calls.lock().unwrap().push(LlmCall {
            user: user.to_string(),
            image_urls: image_urls.to_vec(),
        });
        match self.rules.iter().find(|(marker, _)| user.contains(marker.as_str())) {
            Some((_, Ok(text))) => Ok(text.clone()),
            Some((_, Err(message))) => Err(anyhow!(message.clone())),
            None => Err(anyhow!("unexpected prompt")),
        }
    }
}

/// Returns `https://img.test/{n}.png`, failing whenever the prompt contains
/// one of `fail_on`.
#[derive(Debug, Default)]
pub struct MockSynthesizer {
    fail_on: Vec<String>,
    counter: AtomicUsize,
    requests: Mutex<Vec<SynthesisRequest>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: vec![marker.to_string()],
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageSynthesizer for MockSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_on.iter().any(|m| request.prompt.contains(m.as_str())) {
            return Err(anyhow!("synthesis backend unavailable"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://img.test/{}.png", n))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub fail: bool,
    pub records: Mutex<Vec<ThumbnailRecord>>,
}

impl MemoryStore {
    pub fn urls(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.image_url.clone())
            .collect()
    }
}

#[async_trait]
impl ThumbnailStore for MemoryStore {
    async fn save_thumbnail(&self, record: &ThumbnailRecord) -> Result<()> {
        if self.fail {
            return Err(anyhow!("database offline"));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct StaticChannels {
    pub channels: Vec<ChannelInfo>,
}

#[async_trait]
impl ChannelFetcher for StaticChannels {
    async fn fetch_channel(
        &self,
        channel_url: &str,
        channel_type: ChannelType,
    ) -> Result<ChannelInfo> {
        let mut info = self
            .channels
            .iter()
            .find(|c| channel_url.ends_with(c.channel_key.as_str()))
            .cloned()
            .ok_or_else(|| anyhow!("channel not found: {}", channel_url))?;
        for t in &mut info.thumbnails {
            t.channel_type = channel_type;
        }
        Ok(info)
    }
}

pub fn reference(channel: &str, n: usize, channel_type: ChannelType) -> ReferenceThumbnail {
    let video_id = format!("v{:02}", n);
    ReferenceThumbnail {
        id: ReferenceThumbnail::scoped_id(channel, &video_id),
        source_video_id: video_id,
        title: format!("{}の動画{}", channel, n),
        image_url: format!("https://i.ytimg.com/vi/{}-{}/hq.jpg", channel, n),
        channel_name: channel.to_string(),
        channel_type,
    }
}

pub fn own_refs(count: usize) -> Vec<ReferenceThumbnail> {
    (0..count).map(|n| reference("mine", n, ChannelType::Own)).collect()
}
