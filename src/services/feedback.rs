use log::info;

use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::state::ModelImageInfo;
use crate::services::llm::LlmClient;
use crate::services::model_images::{GeneratedModel, VideoContext};
use crate::services::suggestions::{suggest, SuggestionContext};
use crate::services::synthesis::{ImageSynthesizer, SynthesisRequest};

const OPERATION: &str = "model image regeneration";
const REVISED_SUFFIX: &str = "（修正版）";

/// The pattern name without the revision marker.
pub fn base_label(pattern_name: &str) -> &str {
    pattern_name.strip_suffix(REVISED_SUFFIX).unwrap_or(pattern_name)
}

pub fn revised_label(pattern_name: &str) -> String {
    if pattern_name.ends_with(REVISED_SUFFIX) {
        pattern_name.to_string()
    } else {
        format!("{}{}", pattern_name, REVISED_SUFFIX)
    }
}

pub struct FeedbackRegenerator<'a> {
    llm: &'a dyn LlmClient,
    synthesizer: &'a dyn ImageSynthesizer,
}

impl<'a> FeedbackRegenerator<'a> {
    pub fn new(llm: &'a dyn LlmClient, synthesizer: &'a dyn ImageSynthesizer) -> Self {
        Self { llm, synthesizer }
    }

    /// Produces the replacement for `model`. A single synthesis call; the
    /// suggestion refresh falls back like the initial generation.
    pub async fn regenerate(
        &self,
        model: &ModelImageInfo,
        instruction: &str,
        video: VideoContext<'_>,
    ) -> WorkflowResult<GeneratedModel> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(WorkflowError::validation("修正内容を入力してください"));
        }

        info!("Regenerating model image for pattern {}", model.pattern_name);
        let prompt = format!(
            "添付のモデル画像を次の指示に従って作り直してください。\
            \n\n修正指示: {}\
            \n\n元のパターン「{}」: {}\
            \n動画タイトル: {}\
            \n動画の説明: {}\
            \n\n指示されていない部分のデザインはできるだけ維持してください。",
            instruction, model.pattern_name, model.description, video.title, video.description
        );

        let image_url = self
            .synthesizer
            .synthesize(&SynthesisRequest::compose(prompt.clone(), vec![model.image_url.clone()]))
            .await
            .map_err(|e| WorkflowError::collaborator(OPERATION, e))?;

        let suggestions = suggest(
            self.llm,
            &SuggestionContext {
                pattern_name: &model.pattern_name,
                pattern_description: &model.description,
                video_title: video.title,
                video_description: video.description,
                image_url: &image_url,
            },
        )
        .await;

        Ok(GeneratedModel {
            info: ModelImageInfo {
                image_url,
                pattern_name: revised_label(&model.pattern_name),
                description: model.description.clone(),
                required_materials: suggestions.required_materials,
                suggested_texts: suggestions.suggested_texts,
            },
            prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{MockSynthesizer, ScriptedLlm, SUGGEST_MARK};

    fn model() -> ModelImageInfo {
        ModelImageInfo {
            image_url: "https://img.test/original.png".to_string(),
            pattern_name: "赤文字インパクト".to_string(),
            description: "赤い大文字".to_string(),
            required_materials: vec![],
            suggested_texts: vec![],
        }
    }

    fn video() -> VideoContext<'static> {
        VideoContext {
            title: "衝撃の結果",
            description: "",
            references: &[],
        }
    }

    #[test]
    fn test_revised_label_is_not_stacked() {
        assert_eq!(revised_label("A"), "A（修正版）");
        assert_eq!(revised_label("A（修正版）"), "A（修正版）");
        assert_eq!(base_label("A（修正版）"), "A");
        assert_eq!(base_label("A"), "A");
    }

    #[tokio::test]
    async fn test_regenerate_uses_instruction_and_original_image() -> anyhow::Result<()> {
        let llm = ScriptedLlm::new().fail(SUGGEST_MARK, "down");
        let synth = MockSynthesizer::new();

        let revised = FeedbackRegenerator::new(&llm, &synth)
            .regenerate(&model(), "  背景をもっと明るく ", video())
            .await?;

        let requests = synth.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("修正指示: 背景をもっと明るく\n"));
        assert_eq!(requests[0].reference_images, vec!["https://img.test/original.png".to_string()]);
        assert_eq!(revised.info.pattern_name, "赤文字インパクト（修正版）");
        assert_eq!(revised.info.suggested_texts.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_instruction_is_rejected_without_calls() {
        let llm = ScriptedLlm::new();
        let synth = MockSynthesizer::new();
        let err = FeedbackRegenerator::new(&llm, &synth)
            .regenerate(&model(), "   ", video())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(synth.requests().is_empty());
    }
}
