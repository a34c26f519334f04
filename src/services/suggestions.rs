use log::warn;
use serde::Deserialize;

use crate::services::llm::LlmClient;
use crate::services::parser;

const SYSTEM_PROMPT: &str =
    "あなたはYouTubeサムネイル制作のアシスタントです。有効なJSONオブジェクトのみを返してください。";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestions {
    #[serde(default)]
    pub required_materials: Vec<String>,
    #[serde(default)]
    pub suggested_texts: Vec<String>,
}

impl Suggestions {
    /// Fixed guidance used whenever the suggestion call cannot be used.
    pub fn fallback() -> Self {
        Self {
            required_materials: vec![
                "人物の表情が分かる写真".to_string(),
                "動画の内容を表す背景画像".to_string(),
            ],
            suggested_texts: vec!["衝撃の結末".to_string(), "見逃し厳禁".to_string()],
        }
    }

    fn or_fallback(mut self) -> Self {
        let fallback = Self::fallback();
        if self.required_materials.is_empty() {
            self.required_materials = fallback.required_materials;
        }
        if self.suggested_texts.is_empty() {
            self.suggested_texts = fallback.suggested_texts;
        }
        self
    }
}

pub struct SuggestionContext<'a> {
    pub pattern_name: &'a str,
    pub pattern_description: &'a str,
    pub video_title: &'a str,
    pub video_description: &'a str,
    pub image_url: &'a str,
}

/// Advisory call: never fails. Transport errors, unreadable responses and
/// empty lists all degrade to [`Suggestions::fallback`].
pub async fn suggest(llm: &dyn LlmClient, ctx: &SuggestionContext<'_>) -> Suggestions {
    let prompt = format!(
        "【素材提案】次のモデル画像をもとにサムネイルを完成させるために必要な素材と、\
        入れるべき短いテキスト案を提案してください。\
        \n\nパターン: {}\
        \nパターンの説明: {}\
        \n動画タイトル: {}\
        \n動画の説明: {}\
        \n\n次の形式のJSONオブジェクトのみを返してください:\
        \n{{ \"requiredMaterials\": [\"...\"], \"suggestedTexts\": [\"...\"] }}",
        ctx.pattern_name, ctx.pattern_description, ctx.video_title, ctx.video_description
    );

    let text = match llm
        .complete(SYSTEM_PROMPT, &prompt, &[ctx.image_url.to_string()])
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!("Suggestion request for {} failed, using fallback: {:#}", ctx.pattern_name, e);
            return Suggestions::fallback();
        }
    };

    match parser::extract_as::<Suggestions>(&text) {
        Ok(suggestions) => suggestions.or_fallback(),
        Err(e) => {
            warn!("Suggestion response for {} unreadable, using fallback: {}", ctx.pattern_name, e);
            Suggestions::fallback()
        }
    }
}
