use futures_util::StreamExt;
use log::info;
use std::collections::HashSet;

use crate::core::config::WorkflowConfig;
use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::state::{
    ChannelType, ModelImageInfo, PatternAnalysisResult, PatternCategory, ReferenceThumbnail,
};
use crate::services::llm::LlmClient;
use crate::services::suggestions::{suggest, SuggestionContext};
use crate::services::synthesis::{ImageSynthesizer, SynthesisRequest};

const OPERATION: &str = "model image generation";

#[derive(Debug, Clone, Copy)]
pub struct VideoContext<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub references: &'a [ReferenceThumbnail],
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedModel {
    pub info: ModelImageInfo,
    pub prompt: String,
}

pub struct ModelImageGenerator<'a> {
    llm: &'a dyn LlmClient,
    synthesizer: &'a dyn ImageSynthesizer,
    settings: &'a WorkflowConfig,
}

impl<'a> ModelImageGenerator<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        synthesizer: &'a dyn ImageSynthesizer,
        settings: &'a WorkflowConfig,
    ) -> Self {
        Self {
            llm,
            synthesizer,
            settings,
        }
    }

    /// One model image per pattern, generated concurrently.
    ///
    /// Join policy is all-or-nothing on synthesis: if any pattern's image
    /// fails, the whole batch fails and nothing is returned. Suggestion
    /// sub-calls never fail the batch.
    pub async fn generate(
        &self,
        analysis: &PatternAnalysisResult,
        video: VideoContext<'_>,
    ) -> WorkflowResult<Vec<GeneratedModel>> {
        if analysis.patterns.is_empty() {
            return Err(WorkflowError::validation("分析済みのパターンがありません"));
        }

        info!("Generating {} model images", analysis.patterns.len());
        let results: Vec<WorkflowResult<(usize, GeneratedModel)>> =
            futures_util::stream::iter(analysis.patterns.iter().enumerate())
                .map(|(i, pattern)| async move {
                    let model = self.generate_one(pattern, video).await?;
                    Ok((i, model))
                })
                .buffer_unordered(self.settings.max_concurrency.max(1))
                .collect()
                .await;

        let mut slots: Vec<Option<GeneratedModel>> = vec![None; analysis.patterns.len()];
        for res in results {
            let (i, model) = res?;
            slots[i] = Some(model);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    async fn generate_one(
        &self,
        pattern: &PatternCategory,
        video: VideoContext<'_>,
    ) -> WorkflowResult<GeneratedModel> {
        let relevant = relevant_references(pattern, video.references);
        let prompt = model_prompt(pattern, video, &relevant, self.settings.prompt_title_limit);
        let request = SynthesisRequest::compose(
            prompt.clone(),
            prioritized_images(&relevant, self.settings.model_reference_limit),
        );

        let image_url = self
            .synthesizer
            .synthesize(&request)
            .await
            .map_err(|e| WorkflowError::collaborator(OPERATION, e))?;

        let suggestions = suggest(
            self.llm,
            &SuggestionContext {
                pattern_name: &pattern.name,
                pattern_description: &pattern.description,
                video_title: video.title,
                video_description: video.description,
                image_url: &image_url,
            },
        )
        .await;

        Ok(GeneratedModel {
            info: ModelImageInfo {
                image_url,
                pattern_name: pattern.name.clone(),
                description: pattern.description.clone(),
                required_materials: suggestions.required_materials,
                suggested_texts: suggestions.suggested_texts,
            },
            prompt,
        })
    }
}

/// References the pattern was matched on; every selected reference when the
/// indices point nowhere.
pub fn relevant_references<'r>(
    pattern: &PatternCategory,
    references: &'r [ReferenceThumbnail],
) -> Vec<&'r ReferenceThumbnail> {
    let mut seen = HashSet::new();
    let matched: Vec<&ReferenceThumbnail> = pattern
        .matching_image_indices
        .iter()
        .filter_map(|&i| references.get(i))
        .filter(|r| seen.insert(r.id.as_str()))
        .collect();

    if matched.is_empty() {
        references.iter().collect()
    } else {
        matched
    }
}

/// Own-channel images first, then competitor images, capped at `limit`.
pub fn prioritized_images(references: &[&ReferenceThumbnail], limit: usize) -> Vec<String> {
    let own = references.iter().filter(|r| r.channel_type == ChannelType::Own);
    let competitor = references.iter().filter(|r| r.channel_type == ChannelType::Competitor);
    own.chain(competitor)
        .take(limit)
        .map(|r| r.image_url.clone())
        .collect()
}

fn model_prompt(
    pattern: &PatternCategory,
    video: VideoContext<'_>,
    relevant: &[&ReferenceThumbnail],
    title_limit: usize,
) -> String {
    let c = &pattern.characteristics;
    let titles = relevant
        .iter()
        .take(title_limit)
        .map(|r| format!("- {}", r.title))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "YouTubeサムネイルのモデル画像を1枚生成してください。\
        \n\nデザインパターン「{}」: {}\
        \n- 文字の位置: {}\
        \n- 配色: {}\
        \n- 人物の配置: {}\
        \n- レイアウト: {}\
        \n- 効果: {}\
        \n\n動画タイトル: {}\
        \n動画の説明: {}\
        \n\n参考動画のタイトル:\n{}\
        \n\n添付画像は先頭ほど優先度の高い参考です。後方の画像はスタイルのみを参考にし、写っている人物を複製しないでください。",
        pattern.name,
        pattern.description,
        c.text_position,
        c.color_scheme,
        c.person_position,
        c.layout,
        c.effects,
        video.title,
        video.description,
        titles
    )
}
