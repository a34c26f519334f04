//! Two-stage pattern analysis over the selected reference thumbnails.
//!
//! Stage 1 grounds every image in concrete observations; stage 2 clusters
//! those observations (not the raw images) into 2 to 4 re-creatable patterns.

use log::{info, warn};
use serde::Deserialize;

use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::state::{ImageAnalysis, PatternAnalysisResult, PatternCategory, ReferenceThumbnail};
use crate::services::llm::{ask_json, LlmClient};
use crate::services::parser::ParseError;

pub const MIN_PATTERNS: usize = 2;
pub const MAX_PATTERNS: usize = 4;

const OPERATION: &str = "pattern analysis";

const SYSTEM_PROMPT: &str =
    "あなたはYouTubeサムネイルのデザイン分析の専門家です。有効なJSONオブジェクトのみを返してください。";

#[derive(Debug, Deserialize)]
struct ExtractionResult {
    images: Vec<ImageAnalysis>,
}

#[derive(Debug, Deserialize)]
struct ClusteringResult {
    patterns: Vec<PatternCategory>,
    #[serde(default)]
    summary: String,
}

pub struct PatternAnalyzer<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> PatternAnalyzer<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }

    /// Runs both stages. No retries; a failure in either stage fails the
    /// whole analysis.
    pub async fn analyze(
        &self,
        references: &[ReferenceThumbnail],
    ) -> WorkflowResult<PatternAnalysisResult> {
        if references.is_empty() {
            return Err(WorkflowError::validation("参考サムネイルが選択されていません"));
        }

        info!("Pattern analysis stage 1: {} images", references.len());
        let image_urls: Vec<String> = references.iter().map(|r| r.image_url.clone()).collect();
        let extraction: ExtractionResult = ask_json(
            self.llm,
            OPERATION,
            SYSTEM_PROMPT,
            &extraction_prompt(references),
            &image_urls,
        )
        .await?;

        let mut per_image = extraction.images;
        if per_image.is_empty() {
            return Err(WorkflowError::parse(
                OPERATION,
                ParseError::Malformed("no per-image records in extraction response".to_string()),
            ));
        }
        for (i, record) in per_image.iter_mut().enumerate() {
            if record.image_index == 0 && i > 0 {
                record.image_index = i;
            }
        }

        info!("Pattern analysis stage 2: clustering {} records", per_image.len());
        let clustering: ClusteringResult = ask_json(
            self.llm,
            OPERATION,
            SYSTEM_PROMPT,
            &clustering_prompt(&per_image)?,
            &[],
        )
        .await?;

        let count = clustering.patterns.len();
        if !(MIN_PATTERNS..=MAX_PATTERNS).contains(&count) {
            warn!(
                "Pattern analysis returned {} patterns (expected {}-{}); keeping as-is",
                count, MIN_PATTERNS, MAX_PATTERNS
            );
        }

        Ok(PatternAnalysisResult {
            patterns: clustering.patterns,
            summary: clustering.summary,
            per_image_analysis: per_image,
        })
    }
}

fn extraction_prompt(references: &[ReferenceThumbnail]) -> String {
    let listing = references
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "画像{}: 「{}」({} / {})",
                i,
                r.title,
                r.channel_name,
                r.channel_type.label()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "【個別分析】添付した{}枚のサムネイル画像を1枚ずつ分析してください。\
        \n画像は添付順に0から番号付けされています。\
        \n\n{}\
        \n\n各画像について次の観点を具体的に記述してください:\
        \n- text: 文字の内容・位置・フォント・色・縁取り\
        \n- color: 配色と全体の雰囲気\
        \n- composition: 構図とレイアウト\
        \n- person: 人物の有無・位置・表情\
        \n- effects: 矢印・枠・集中線などの視覚効果\
        \n\n次の形式のJSONオブジェクトのみを返してください:\
        \n{{ \"images\": [ {{ \"imageIndex\": 0, \"text\": {{...}}, \"color\": {{...}}, \"composition\": {{...}}, \"person\": {{...}}, \"effects\": {{...}} }} ] }}",
        references.len(),
        listing
    )
}

fn clustering_prompt(per_image: &[ImageAnalysis]) -> WorkflowResult<String> {
    let records = serde_json::to_string_pretty(per_image)
        .map_err(|e| WorkflowError::collaborator(OPERATION, e.into()))?;

    Ok(format!(
        "【パターン抽出】以下は参考サムネイルの個別分析結果です。\
        \n\n{}\
        \n\nルール:\
        \n- {}〜{}個のデザインパターンに分類すること\
        \n- 各パターンは2枚以上の画像に共通していること\
        \n- 各パターンは再現可能な具体的デザインルールとして記述すること\
        \n\n次の形式のJSONオブジェクトのみを返してください:\
        \n{{ \"patterns\": [ {{ \"name\": \"...\", \"description\": \"...\", \
        \"characteristics\": {{ \"textPosition\": \"...\", \"colorScheme\": \"...\", \"personPosition\": \"...\", \"layout\": \"...\", \"effects\": \"...\" }}, \
        \"matchingImageIndices\": [0, 1] }} ], \"summary\": \"...\" }}",
        records, MIN_PATTERNS, MAX_PATTERNS
    ))
}
