use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::fmt::Debug;
use url::Url;

use crate::core::config::ChannelConfig;
use crate::core::state::{ChannelType, ReferenceThumbnail};

/// Maximum thumbnails the metadata service returns per channel.
pub const MAX_FETCHED_THUMBNAILS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    /// Stable channel identifier; the id prefix of every thumbnail below.
    pub channel_key: String,
    pub channel_name: String,
    pub channel_icon: Option<String>,
    /// Most recent first.
    pub thumbnails: Vec<ReferenceThumbnail>,
}

#[async_trait]
pub trait ChannelFetcher: Send + Sync + Debug {
    async fn fetch_channel(
        &self,
        channel_url: &str,
        channel_type: ChannelType,
    ) -> Result<ChannelInfo>;
}

pub fn create_channel_fetcher(config: &ChannelConfig) -> Result<Box<dyn ChannelFetcher>> {
    Ok(Box::new(HttpChannelFetcher::new(&config.base_url, config.api_key.as_deref())?))
}

#[derive(Debug)]
pub struct HttpChannelFetcher {
    base_url: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpChannelFetcher {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid channel service url: {}", base_url))?;
        Ok(Self {
            base_url,
            api_key: api_key.map(str::to_string),
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, channel_url: &str) -> Result<Url> {
        let mut url = self.base_url.join("channel")?;
        url.query_pairs_mut().append_pair("url", channel_url);
        Ok(url)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResponse {
    channel_id: String,
    channel_name: String,
    channel_icon: Option<String>,
    #[serde(default)]
    videos: Vec<VideoEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoEntry {
    video_id: String,
    title: String,
    thumbnail_url: String,
}

fn into_channel_info(response: ChannelResponse, channel_type: ChannelType) -> ChannelInfo {
    let thumbnails = response
        .videos
        .into_iter()
        .take(MAX_FETCHED_THUMBNAILS)
        .map(|v| ReferenceThumbnail {
            id: ReferenceThumbnail::scoped_id(&response.channel_id, &v.video_id),
            source_video_id: v.video_id,
            title: v.title,
            image_url: v.thumbnail_url,
            channel_name: response.channel_name.clone(),
            channel_type,
        })
        .collect();

    ChannelInfo {
        channel_key: response.channel_id,
        channel_name: response.channel_name,
        channel_icon: response.channel_icon,
        thumbnails,
    }
}

#[async_trait]
impl ChannelFetcher for HttpChannelFetcher {
    async fn fetch_channel(
        &self,
        channel_url: &str,
        channel_type: ChannelType,
    ) -> Result<ChannelInfo> {
        let url = self.endpoint(channel_url)?;
        debug!("fetching channel metadata: {}", url);

        let mut builder = self.client.get(url);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        let resp = builder.send().await.context("Failed to reach channel service")?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Channel service error: {}", error_text));
        }

        let body: ChannelResponse = resp.json().await.context("Failed to parse channel response")?;
        Ok(into_channel_info(body, channel_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_channel_url() -> Result<()> {
        let fetcher = HttpChannelFetcher::new("http://localhost:9100/api/", None)?;
        let url = fetcher.endpoint("https://www.youtube.com/@example?x=1")?;
        assert_eq!(url.path(), "/api/channel");
        assert_eq!(
            url.query_pairs().next().map(|(k, v)| (k.to_string(), v.to_string())),
            Some(("url".to_string(), "https://www.youtube.com/@example?x=1".to_string()))
        );
        Ok(())
    }

    #[test]
    fn test_response_maps_to_scoped_thumbnails() {
        let json = r#"{
            "channelId": "UC123",
            "channelName": "実験チャンネル",
            "channelIcon": "https://yt3/icon.jpg",
            "videos": [
                {"videoId": "a1", "title": "最新回", "thumbnailUrl": "https://i.ytimg.com/vi/a1/hq.jpg"},
                {"videoId": "b2", "title": "前回", "thumbnailUrl": "https://i.ytimg.com/vi/b2/hq.jpg"}
            ]
        }"#;
        let response: ChannelResponse = serde_json::from_str(json).unwrap();
        let info = into_channel_info(response, ChannelType::Competitor);

        assert_eq!(info.channel_key, "UC123");
        assert_eq!(info.thumbnails.len(), 2);
        assert_eq!(info.thumbnails[0].id, "UC123:a1");
        assert!(info.thumbnails[0].belongs_to("UC123"));
        assert_eq!(info.thumbnails[1].channel_type, ChannelType::Competitor);
        assert_eq!(info.thumbnails[1].channel_name, "実験チャンネル");
    }
}
