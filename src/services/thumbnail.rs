//! Final thumbnail composition and the append-only refinement loop.

use log::info;

use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::state::{
    ChannelType, ModelImageInfo, PatternAnalysisResult, PatternCategory, ReferenceThumbnail,
};
use crate::services::feedback::base_label;
use crate::services::materials::MaterialItem;
use crate::services::synthesis::{ImageSynthesizer, SynthesisRequest};

const GENERATE_OPERATION: &str = "thumbnail generation";
const REFINE_OPERATION: &str = "thumbnail refinement";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// Keep the selected model's person fixed; only add text and small tweaks.
    PreservePerson,
    /// Compose anew from pattern guidance, materials and text.
    FreshComposition,
}

impl GenerationMode {
    /// Uploaded materials mean new elements must be worked in, which rules
    /// out strict identity preservation.
    pub fn select(has_model: bool, has_materials: bool) -> Self {
        if has_model && !has_materials {
            GenerationMode::PreservePerson
        } else {
            GenerationMode::FreshComposition
        }
    }
}

pub struct FinalInputs<'a> {
    pub video_title: &'a str,
    pub video_description: &'a str,
    pub text: &'a str,
    pub analysis: Option<&'a PatternAnalysisResult>,
    pub model: Option<&'a ModelImageInfo>,
    pub materials: &'a [MaterialItem],
    pub references: &'a [ReferenceThumbnail],
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedThumbnail {
    pub image_url: String,
    pub prompt: String,
}

/// Selected model first, then uploaded materials, then own-channel and
/// finally competitor references.
pub fn final_reference_order(inputs: &FinalInputs<'_>, limit: usize) -> Vec<String> {
    let model = inputs.model.map(|m| m.image_url.clone());
    let materials = inputs.materials.iter().map(MaterialItem::data_url);
    let own = inputs
        .references
        .iter()
        .filter(|r| r.channel_type == ChannelType::Own)
        .map(|r| r.image_url.clone());
    let competitor = inputs
        .references
        .iter()
        .filter(|r| r.channel_type == ChannelType::Competitor)
        .map(|r| r.image_url.clone());

    model
        .into_iter()
        .chain(materials)
        .chain(own)
        .chain(competitor)
        .take(limit)
        .collect()
}

pub fn build_request(inputs: &FinalInputs<'_>, limit: usize) -> SynthesisRequest {
    let mode = GenerationMode::select(inputs.model.is_some(), !inputs.materials.is_empty());
    let prompt = match mode {
        GenerationMode::PreservePerson => preserve_person_prompt(inputs),
        GenerationMode::FreshComposition => fresh_composition_prompt(inputs),
    };
    SynthesisRequest::compose(prompt, final_reference_order(inputs, limit))
}

const PRIORITY_RULES: &str = "添付画像は先頭ほど優先度が高い参考です。\
    先頭の画像の人物を主役として扱い、後方の参考サムネイルはスタイルのみを参考にしてください。\
    参考サムネイルに写っている人物は絶対に複製しないでください。";

fn preserve_person_prompt(inputs: &FinalInputs<'_>) -> String {
    format!(
        "1枚目の画像をベースにYouTubeサムネイルを仕上げてください。\
        \n写っている人物の顔・髪型・服装・ポーズは一切変えないでください。\
        \n変更してよいのはテキストの追加と、色味や明るさなどの軽微な調整のみです。\
        \n\n入れるテキスト: 「{}」\
        \n動画タイトル: {}\
        \n\n{}",
        inputs.text, inputs.video_title, PRIORITY_RULES
    )
}

fn pattern_guidance(pattern: &PatternCategory) -> String {
    let c = &pattern.characteristics;
    format!(
        "パターン「{}」: {}\n- 文字の位置: {}\n- 配色: {}\n- 人物の配置: {}\n- レイアウト: {}\n- 効果: {}",
        pattern.name,
        pattern.description,
        c.text_position,
        c.color_scheme,
        c.person_position,
        c.layout,
        c.effects
    )
}

fn fresh_composition_prompt(inputs: &FinalInputs<'_>) -> String {
    let mut guidance = Vec::new();
    if let Some(analysis) = inputs.analysis {
        let chosen = inputs.model.and_then(|m| {
            let name = base_label(&m.pattern_name);
            analysis.patterns.iter().find(|p| p.name == name)
        });
        match chosen {
            Some(pattern) => guidance.push(pattern_guidance(pattern)),
            None => guidance.extend(analysis.patterns.iter().map(pattern_guidance)),
        }
        if !analysis.summary.is_empty() {
            guidance.push(format!("全体の傾向: {}", analysis.summary));
        }
    }

    let materials = inputs
        .materials
        .iter()
        .map(|m| {
            if m.description.is_empty() {
                format!("- {}", m.file_name)
            } else {
                format!("- {}: {}", m.file_name, m.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "YouTubeサムネイルを新しく作成してください。\
        \n\n動画タイトル: {}\
        \n動画の説明: {}\
        \n\nデザインの指針:\n{}\
        \n\nアップロードされた素材(必ず画面に組み込むこと):\n{}\
        \n\nテキスト: 「{}」を大きく読みやすく配置してください。\
        \n\n{}",
        inputs.video_title,
        inputs.video_description,
        guidance.join("\n"),
        if materials.is_empty() { "なし".to_string() } else { materials },
        inputs.text,
        PRIORITY_RULES
    )
}

pub struct ThumbnailGenerator<'a> {
    synthesizer: &'a dyn ImageSynthesizer,
    reference_limit: usize,
}

impl<'a> ThumbnailGenerator<'a> {
    pub fn new(synthesizer: &'a dyn ImageSynthesizer, reference_limit: usize) -> Self {
        Self {
            synthesizer,
            reference_limit,
        }
    }

    pub async fn generate(&self, inputs: &FinalInputs<'_>) -> WorkflowResult<GeneratedThumbnail> {
        if inputs.text.trim().is_empty() {
            return Err(WorkflowError::validation("サムネイルに入れるテキストを入力してください"));
        }

        let request = build_request(inputs, self.reference_limit);
        info!(
            "Generating thumbnail ({} references, model selected: {})",
            request.reference_images.len(),
            inputs.model.is_some()
        );
        let image_url = self
            .synthesizer
            .synthesize(&request)
            .await
            .map_err(|e| WorkflowError::collaborator(GENERATE_OPERATION, e))?;

        Ok(GeneratedThumbnail {
            image_url,
            prompt: request.prompt,
        })
    }

    /// Edits `latest` with a freeform instruction and no reference images.
    pub async fn refine(
        &self,
        latest: &str,
        instruction: &str,
    ) -> WorkflowResult<GeneratedThumbnail> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(WorkflowError::validation("修正内容を入力してください"));
        }

        let request = SynthesisRequest::edit(instruction.to_string(), latest);
        let image_url = self
            .synthesizer
            .synthesize(&request)
            .await
            .map_err(|e| WorkflowError::collaborator(REFINE_OPERATION, e))?;

        Ok(GeneratedThumbnail {
            image_url,
            prompt: request.prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::materials::tests::CountingBackend;
    use crate::services::materials::MaterialManager;
    use crate::services::test_support::{reference, MockSynthesizer};
    use std::sync::Arc;

    fn model() -> ModelImageInfo {
        ModelImageInfo {
            image_url: "https://img.test/model.png".to_string(),
            pattern_name: "赤文字（修正版）".to_string(),
            description: "赤い大文字".to_string(),
            required_materials: vec![],
            suggested_texts: vec![],
        }
    }

    fn analysis() -> PatternAnalysisResult {
        let p = |name: &str| PatternCategory {
            name: name.to_string(),
            description: format!("{}の説明", name),
            characteristics: Default::default(),
            matching_image_indices: vec![],
        };
        PatternAnalysisResult {
            patterns: vec![p("赤文字"), p("青背景")],
            summary: "文字主体".to_string(),
            per_image_analysis: vec![],
        }
    }

    fn refs() -> Vec<ReferenceThumbnail> {
        vec![
            reference("rival", 0, ChannelType::Competitor),
            reference("mine", 0, ChannelType::Own),
        ]
    }

    fn inputs<'a>(
        model: Option<&'a ModelImageInfo>,
        materials: &'a [MaterialItem],
        references: &'a [ReferenceThumbnail],
        analysis: &'a PatternAnalysisResult,
    ) -> FinalInputs<'a> {
        FinalInputs {
            video_title: "衝撃の結果",
            video_description: "",
            text: "神回",
            analysis: Some(analysis),
            model,
            materials,
            references,
        }
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(GenerationMode::select(true, false), GenerationMode::PreservePerson);
        assert_eq!(GenerationMode::select(true, true), GenerationMode::FreshComposition);
        assert_eq!(GenerationMode::select(false, false), GenerationMode::FreshComposition);
        assert_eq!(GenerationMode::select(false, true), GenerationMode::FreshComposition);
    }

    #[test]
    fn test_preserve_mode_orders_model_own_competitor() {
        let m = model();
        let r = refs();
        let a = analysis();
        let request = build_request(&inputs(Some(&m), &[], &r, &a), 8);

        assert_eq!(
            request.reference_images,
            vec![
                "https://img.test/model.png".to_string(),
                r[1].image_url.clone(),
                r[0].image_url.clone(),
            ]
        );
        assert!(request.prompt.contains("一切変えない"));
        assert!(request.prompt.contains("「神回」"));
        assert!(!request.edit_mode);
    }

    #[test]
    fn test_materials_switch_to_fresh_composition() {
        let manager = MaterialManager::new(Arc::new(CountingBackend::default()));
        let materials = vec![manager.create("face.png", b"x".to_vec(), "驚いた顔").unwrap()];
        let m = model();
        let r = refs();
        let a = analysis();
        let request = build_request(&inputs(Some(&m), &materials, &r, &a), 3);

        assert_eq!(request.reference_images.len(), 3);
        assert_eq!(request.reference_images[0], "https://img.test/model.png");
        assert!(request.reference_images[1].starts_with("data:image/png;base64,"));
        assert_eq!(request.reference_images[2], r[1].image_url);
        assert!(request.prompt.contains("face.png: 驚いた顔"));
        // the selected model's own pattern is used, not every pattern
        assert!(request.prompt.contains("パターン「赤文字」"));
        assert!(!request.prompt.contains("パターン「青背景」"));
        assert!(request.prompt.contains("全体の傾向: 文字主体"));
    }

    #[test]
    fn test_pattern_lookup_is_exact_when_names_share_a_prefix() {
        let manager = MaterialManager::new(Arc::new(CountingBackend::default()));
        let materials = vec![manager.create("face.png", b"x".to_vec(), "").unwrap()];
        let mut a = analysis();
        a.patterns[0].name = "顔アップ".to_string();
        a.patterns[1].name = "顔アップ文字".to_string();
        let r = refs();

        for label in ["顔アップ文字", "顔アップ文字（修正版）"] {
            let mut m = model();
            m.pattern_name = label.to_string();
            let request = build_request(&inputs(Some(&m), &materials, &r, &a), 8);
            assert!(request.prompt.contains("パターン「顔アップ文字」"));
            assert!(!request.prompt.contains("パターン「顔アップ」"));
        }
    }

    #[test]
    fn test_without_model_all_patterns_guide_composition() {
        let r = refs();
        let a = analysis();
        let request = build_request(&inputs(None, &[], &r, &a), 8);
        assert_eq!(request.reference_images[0], r[1].image_url);
        assert!(request.prompt.contains("パターン「赤文字」"));
        assert!(request.prompt.contains("パターン「青背景」"));
    }

    #[tokio::test]
    async fn test_refine_edits_latest_without_references() -> anyhow::Result<()> {
        let synth = MockSynthesizer::new();
        let out = ThumbnailGenerator::new(&synth, 8)
            .refine("https://img.test/last.png", "文字を黄色に")
            .await?;

        let requests = synth.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].edit_mode);
        assert!(requests[0].reference_images.is_empty());
        assert_eq!(requests[0].original_image.as_deref(), Some("https://img.test/last.png"));
        assert_eq!(out.prompt, "文字を黄色に");
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_requires_text() {
        let synth = MockSynthesizer::new();
        let r = refs();
        let a = analysis();
        let mut i = inputs(None, &[], &r, &a);
        i.text = " ";
        let err = ThumbnailGenerator::new(&synth, 8).generate(&i).await.unwrap_err();
        assert!(err.is_validation());
    }
}
