use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::materials::MaterialItem;

/// Selection cap applied independently to own and competitor references.
pub const MAX_PER_CATEGORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Step {
    Title = 1,
    References = 2,
    Patterns = 3,
    ModelImages = 4,
    Materials = 5,
    Generate = 6,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::Title,
        Step::References,
        Step::Patterns,
        Step::ModelImages,
        Step::Materials,
        Step::Generate,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    pub fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::Title => "動画情報",
            Step::References => "参考サムネイル",
            Step::Patterns => "パターン分析",
            Step::ModelImages => "モデル画像",
            Step::Materials => "素材・テキスト",
            Step::Generate => "生成・修正",
        }
    }
}

impl TryFrom<u8> for Step {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Step::from_number(n).ok_or_else(|| format!("step out of range: {}", n))
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> u8 {
        step.number()
    }
}

impl Default for Step {
    fn default() -> Self {
        Step::Title
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Own,
    Competitor,
}

impl ChannelType {
    pub fn label(self) -> &'static str {
        match self {
            ChannelType::Own => "自チャンネル",
            ChannelType::Competitor => "競合チャンネル",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceThumbnail {
    /// `"{channel_key}:{video_id}"`; the prefix scopes the id to its source channel.
    pub id: String,
    pub source_video_id: String,
    pub title: String,
    pub image_url: String,
    pub channel_name: String,
    pub channel_type: ChannelType,
}

impl ReferenceThumbnail {
    pub fn scoped_id(channel_key: &str, video_id: &str) -> String {
        format!("{}:{}", channel_key, video_id)
    }

    pub fn belongs_to(&self, channel_key: &str) -> bool {
        self.id
            .strip_prefix(channel_key)
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

/// Candidate pool fetched for one channel; the source for manual toggling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCandidates {
    pub channel_key: String,
    pub channel_name: String,
    pub channel_icon: Option<String>,
    pub channel_type: ChannelType,
    pub thumbnails: Vec<ReferenceThumbnail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Characteristics {
    pub text_position: String,
    pub color_scheme: String,
    pub person_position: String,
    pub layout: String,
    pub effects: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub characteristics: Characteristics,
    #[serde(default)]
    pub matching_image_indices: Vec<usize>,
}

/// Stage-1 observation for a single reference image. Detail fields are kept
/// as raw JSON; they only ever flow back into the clustering prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageAnalysis {
    pub image_index: usize,
    pub text: Value,
    pub color: Value,
    pub composition: Value,
    pub person: Value,
    pub effects: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalysisResult {
    pub patterns: Vec<PatternCategory>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub per_image_analysis: Vec<ImageAnalysis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelImageInfo {
    pub image_url: String,
    pub pattern_name: String,
    pub description: String,
    pub required_materials: Vec<String>,
    pub suggested_texts: Vec<String>,
}

/// Busy flags for collaborator-backed operations. A second invocation while a
/// flag is raised is refused; nothing is ever cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlight {
    pub fetching: bool,
    pub analyzing: bool,
    pub generating_models: bool,
    pub regenerating: bool,
    pub generating_thumbnail: bool,
    pub refining: bool,
}

impl InFlight {
    pub fn any(&self) -> bool {
        self.fetching
            || self.analyzing
            || self.generating_models
            || self.regenerating
            || self.generating_thumbnail
            || self.refining
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub step: Step,
    pub video_title: String,
    pub video_description: String,
    pub selected_references: Vec<ReferenceThumbnail>,
    #[serde(default)]
    pub candidates: Vec<ChannelCandidates>,
    pub pattern_analysis: Option<PatternAnalysisResult>,
    pub model_images: Vec<ModelImageInfo>,
    pub selected_model_index: Option<usize>,
    #[serde(skip)]
    pub materials: Vec<MaterialItem>,
    pub text: String,
    pub generated_images: Vec<String>,
    #[serde(skip)]
    pub in_flight: InFlight,
}

impl WorkflowState {
    pub fn selected_model(&self) -> Option<&ModelImageInfo> {
        self.selected_model_index
            .and_then(|index| self.model_images.get(index))
    }

    pub fn references_of(
        &self,
        channel_type: ChannelType,
    ) -> impl Iterator<Item = &ReferenceThumbnail> {
        self.selected_references
            .iter()
            .filter(move |r| r.channel_type == channel_type)
    }

    pub fn count_of(&self, channel_type: ChannelType) -> usize {
        self.references_of(channel_type).count()
    }

    pub fn latest_generated(&self) -> Option<&str> {
        self.generated_images.last().map(String::as_str)
    }
}
