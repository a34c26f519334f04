//! The six-step workflow: owns [`WorkflowState`], gates every step change,
//! and fires generation automatically on forward entry into steps 4 and 6.
//!
//! All mutation goes through [`WorkflowAction`] (or the equivalent methods);
//! callers only ever get shared access to the state.

use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

use crate::core::config::WorkflowConfig;
use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::io::Storage;
use crate::core::state::{
    ChannelCandidates, ChannelType, InFlight, ReferenceThumbnail, Step, WorkflowState,
};
use crate::services::analysis::PatternAnalyzer;
use crate::services::channel::ChannelFetcher;
use crate::services::feedback::FeedbackRegenerator;
use crate::services::llm::LlmClient;
use crate::services::materials::{MaterialManager, PreviewBackend};
use crate::services::model_images::{ModelImageGenerator, VideoContext};
use crate::services::persistence::{record_quietly, ThumbnailRecord, ThumbnailStore};
use crate::services::selection::{self, SelectionChange};
use crate::services::synthesis::ImageSynthesizer;
use crate::services::thumbnail::{FinalInputs, ThumbnailGenerator};

/// External services the workflow calls into, supplied at construction.
pub struct Collaborators {
    pub llm: Box<dyn LlmClient>,
    pub synthesizer: Box<dyn ImageSynthesizer>,
    pub channels: Box<dyn ChannelFetcher>,
    pub store: Box<dyn ThumbnailStore>,
    pub previews: Arc<dyn PreviewBackend>,
}

#[derive(Debug)]
pub enum WorkflowAction {
    SetVideoInfo { title: String, description: String },
    FetchReferences { channel_url: String, channel_type: ChannelType },
    ToggleReference(ReferenceThumbnail),
    Analyze,
    GenerateModelImages,
    SelectModel(usize),
    RegenerateModel { instruction: String },
    AddMaterial { file_name: String, bytes: Vec<u8>, description: String },
    DescribeMaterial { id: String, description: String },
    RemoveMaterial(String),
    SetText(String),
    GenerateThumbnail,
    Refine { instruction: String },
    Advance,
    Retreat,
    GoTo(Step),
    Reset,
}

#[derive(Debug)]
pub enum ActionOutcome {
    Updated,
    Selection(SelectionChange),
    ReferencesPicked(usize),
    MaterialAdded(String),
    MaterialRemoved(bool),
    Image(String),
    Moved(Transition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoTrigger {
    ModelImages,
    Thumbnail,
}

/// Result of a step change. A failed auto-trigger does not undo the move; it
/// is reported here once.
#[derive(Debug)]
pub struct Transition {
    pub from: Step,
    pub to: Step,
    pub direction: Direction,
    pub triggered: Option<AutoTrigger>,
    pub trigger_error: Option<WorkflowError>,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Fetch,
    Analyze,
    Models,
    Regenerate,
    Thumbnail,
    Refine,
}

impl Job {
    fn label(self) -> &'static str {
        match self {
            Job::Fetch => "reference fetch",
            Job::Analyze => "pattern analysis",
            Job::Models => "model image generation",
            Job::Regenerate => "model image regeneration",
            Job::Thumbnail => "thumbnail generation",
            Job::Refine => "thumbnail refinement",
        }
    }

    fn flag(self, in_flight: &mut InFlight) -> &mut bool {
        match self {
            Job::Fetch => &mut in_flight.fetching,
            Job::Analyze => &mut in_flight.analyzing,
            Job::Models => &mut in_flight.generating_models,
            Job::Regenerate => &mut in_flight.regenerating,
            Job::Thumbnail => &mut in_flight.generating_thumbnail,
            Job::Refine => &mut in_flight.refining,
        }
    }
}

/// Drives one workflow session.
///
/// Every operation takes `&mut self`, so the borrow checker already rules
/// out two overlapping calls on one manager. The `InFlight` flags record
/// which call is running for the presentation layer and gate the
/// auto-triggers; a flag found raised refuses the call with
/// [`WorkflowError::Busy`].
pub struct WorkflowManager {
    settings: WorkflowConfig,
    state: WorkflowState,
    llm: Box<dyn LlmClient>,
    synthesizer: Box<dyn ImageSynthesizer>,
    channels: Box<dyn ChannelFetcher>,
    store: Box<dyn ThumbnailStore>,
    materials: MaterialManager,
    storage: Arc<dyn Storage>,
    session_path: String,
}

impl WorkflowManager {
    pub fn new(
        settings: WorkflowConfig,
        collaborators: Collaborators,
        storage: Arc<dyn Storage>,
        session_path: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            state: WorkflowState::default(),
            llm: collaborators.llm,
            synthesizer: collaborators.synthesizer,
            channels: collaborators.channels,
            store: collaborators.store,
            materials: MaterialManager::new(collaborators.previews),
            storage,
            session_path: session_path.into(),
        }
    }

    /// Like [`WorkflowManager::new`], resuming from the saved session when
    /// one exists. Materials are not part of a session.
    pub async fn restore(
        settings: WorkflowConfig,
        collaborators: Collaborators,
        storage: Arc<dyn Storage>,
        session_path: impl Into<String>,
    ) -> Result<Self> {
        let mut manager = Self::new(settings, collaborators, storage, session_path);
        if manager.storage.exists(&manager.session_path).await? {
            let bytes = manager.storage.read(&manager.session_path).await?;
            manager.state = serde_json::from_slice(&bytes)?;
            info!("Restored session at step {}", manager.state.step.number());
        }
        Ok(manager)
    }

    pub async fn save_snapshot(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.state)?;
        self.storage.write(&self.session_path, content.as_bytes()).await
    }

    /// Removes the saved session so the next start begins at step 1.
    pub async fn discard_snapshot(&self) -> Result<()> {
        self.storage.delete(&self.session_path).await
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub async fn dispatch(&mut self, action: WorkflowAction) -> WorkflowResult<ActionOutcome> {
        Ok(match action {
            WorkflowAction::SetVideoInfo { title, description } => {
                self.set_video_info(&title, &description);
                ActionOutcome::Updated
            }
            WorkflowAction::FetchReferences {
                channel_url,
                channel_type,
            } => {
                let picked = self.fetch_references(&channel_url, channel_type).await?;
                ActionOutcome::ReferencesPicked(picked)
            }
            WorkflowAction::ToggleReference(thumbnail) => {
                ActionOutcome::Selection(self.toggle_reference(&thumbnail))
            }
            WorkflowAction::Analyze => {
                self.analyze().await?;
                ActionOutcome::Updated
            }
            WorkflowAction::GenerateModelImages => {
                self.generate_model_images().await?;
                ActionOutcome::Updated
            }
            WorkflowAction::SelectModel(index) => {
                self.select_model(index)?;
                ActionOutcome::Updated
            }
            WorkflowAction::RegenerateModel { instruction } => {
                self.regenerate_selected(&instruction).await?;
                ActionOutcome::Updated
            }
            WorkflowAction::AddMaterial {
                file_name,
                bytes,
                description,
            } => ActionOutcome::MaterialAdded(self.add_material(&file_name, bytes, &description)?),
            WorkflowAction::DescribeMaterial { id, description } => {
                self.describe_material(&id, &description)?;
                ActionOutcome::Updated
            }
            WorkflowAction::RemoveMaterial(id) => {
                ActionOutcome::MaterialRemoved(self.remove_material(&id))
            }
            WorkflowAction::SetText(text) => {
                self.set_text(&text);
                ActionOutcome::Updated
            }
            WorkflowAction::GenerateThumbnail => {
                ActionOutcome::Image(self.generate_thumbnail().await?)
            }
            WorkflowAction::Refine { instruction } => {
                ActionOutcome::Image(self.refine(&instruction).await?)
            }
            WorkflowAction::Advance => ActionOutcome::Moved(self.advance_step().await?),
            WorkflowAction::Retreat => ActionOutcome::Moved(self.retreat_step()?),
            WorkflowAction::GoTo(step) => ActionOutcome::Moved(self.go_to_step(step)?),
            WorkflowAction::Reset => {
                self.reset();
                ActionOutcome::Updated
            }
        })
    }

    // --- step 1 ---

    pub fn set_video_info(&mut self, title: &str, description: &str) {
        self.state.video_title = title.trim().to_string();
        self.state.video_description = description.trim().to_string();
    }

    // --- step 2 ---

    pub fn toggle_reference(&mut self, thumbnail: &ReferenceThumbnail) -> SelectionChange {
        selection::toggle(&mut self.state.selected_references, thumbnail)
    }

    /// Fetches a channel's recent thumbnails into the candidate pool and
    /// auto-selects the most recent ones. Returns how many were picked.
    pub async fn fetch_references(
        &mut self,
        channel_url: &str,
        channel_type: ChannelType,
    ) -> WorkflowResult<usize> {
        self.begin(Job::Fetch)?;
        let fetched = self.channels.fetch_channel(channel_url, channel_type).await;
        self.finish(Job::Fetch);
        let info = fetched.map_err(|e| WorkflowError::collaborator(Job::Fetch.label(), e))?;

        info!("Fetched {} thumbnails from {}", info.thumbnails.len(), info.channel_name);
        let picked = selection::auto_select_recent(
            &mut self.state.selected_references,
            &info.thumbnails,
            &info.channel_key,
        );

        self.state.candidates.retain(|c| c.channel_key != info.channel_key);
        self.state.candidates.push(ChannelCandidates {
            channel_key: info.channel_key,
            channel_name: info.channel_name,
            channel_icon: info.channel_icon,
            channel_type,
            thumbnails: info.thumbnails,
        });
        Ok(picked)
    }

    // --- step 3 ---

    /// Replaces any earlier analysis. Existing model images belong to the old
    /// patterns and are dropped with it.
    pub async fn analyze(&mut self) -> WorkflowResult<()> {
        if self.state.selected_references.is_empty() {
            return Err(WorkflowError::validation("参考サムネイルを1枚以上選択してください"));
        }
        self.begin(Job::Analyze)?;
        let result = PatternAnalyzer::new(self.llm.as_ref())
            .analyze(&self.state.selected_references)
            .await;
        self.finish(Job::Analyze);
        let analysis = result?;

        info!("Pattern analysis produced {} patterns", analysis.patterns.len());
        self.state.pattern_analysis = Some(analysis);
        self.state.model_images.clear();
        self.state.selected_model_index = None;
        Ok(())
    }

    // --- step 4 ---

    pub async fn generate_model_images(&mut self) -> WorkflowResult<()> {
        let Some(analysis) = self.state.pattern_analysis.as_ref() else {
            return Err(WorkflowError::validation("先にパターン分析を実行してください"));
        };
        if analysis.patterns.is_empty() {
            return Err(WorkflowError::validation("分析済みのパターンがありません"));
        }
        if self.state.in_flight.generating_models {
            return Err(WorkflowError::Busy(Job::Models.label()));
        }

        self.state.in_flight.generating_models = true;
        let result =
            ModelImageGenerator::new(self.llm.as_ref(), self.synthesizer.as_ref(), &self.settings)
                .generate(analysis, self.video_context())
                .await;
        self.finish(Job::Models);
        let models = result?;

        for model in &models {
            record_quietly(
                self.store.as_ref(),
                ThumbnailRecord::new(&model.info.image_url, &model.prompt, &self.state.video_title),
            )
            .await;
        }
        self.state.model_images = models.into_iter().map(|m| m.info).collect();
        self.state.selected_model_index = None;
        Ok(())
    }

    pub fn select_model(&mut self, index: usize) -> WorkflowResult<()> {
        if index >= self.state.model_images.len() {
            return Err(WorkflowError::validation(format!(
                "モデル画像 {} は存在しません ({}枚)",
                index,
                self.state.model_images.len()
            )));
        }
        self.state.selected_model_index = Some(index);
        Ok(())
    }

    /// Replaces the selected model image with a version revised by
    /// `instruction`.
    pub async fn regenerate_selected(&mut self, instruction: &str) -> WorkflowResult<()> {
        let Some(index) = self.state.selected_model_index else {
            return Err(WorkflowError::validation("修正するモデル画像を選択してください"));
        };
        let Some(model) = self.state.model_images.get(index) else {
            return Err(WorkflowError::validation("選択中のモデル画像が見つかりません"));
        };
        if instruction.trim().is_empty() {
            return Err(WorkflowError::validation("修正内容を入力してください"));
        }
        if self.state.in_flight.regenerating {
            return Err(WorkflowError::Busy(Job::Regenerate.label()));
        }

        self.state.in_flight.regenerating = true;
        let result = FeedbackRegenerator::new(self.llm.as_ref(), self.synthesizer.as_ref())
            .regenerate(model, instruction, self.video_context())
            .await;
        self.finish(Job::Regenerate);
        let revised = result?;

        record_quietly(
            self.store.as_ref(),
            ThumbnailRecord::new(&revised.info.image_url, &revised.prompt, &self.state.video_title),
        )
        .await;
        self.state.model_images[index] = revised.info;
        Ok(())
    }

    // --- step 5 ---

    pub fn add_material(
        &mut self,
        file_name: &str,
        bytes: Vec<u8>,
        description: &str,
    ) -> WorkflowResult<String> {
        let item = self
            .materials
            .create(file_name, bytes, description)
            .map_err(|e| WorkflowError::collaborator("material preview", e))?;
        let id = item.id.clone();
        self.state.materials.push(item);
        Ok(id)
    }

    pub fn describe_material(&mut self, id: &str, description: &str) -> WorkflowResult<()> {
        let item = self
            .state
            .materials
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| WorkflowError::validation(format!("素材 {} は存在しません", id)))?;
        item.description = description.trim().to_string();
        Ok(())
    }

    pub fn remove_material(&mut self, id: &str) -> bool {
        self.materials.remove(&mut self.state.materials, id)
    }

    pub fn set_text(&mut self, text: &str) {
        self.state.text = text.trim().to_string();
    }

    // --- step 6 ---

    /// Composes the final thumbnail and appends it to the history.
    pub async fn generate_thumbnail(&mut self) -> WorkflowResult<String> {
        if self.state.in_flight.generating_thumbnail {
            return Err(WorkflowError::Busy(Job::Thumbnail.label()));
        }
        self.state.in_flight.generating_thumbnail = true;
        let inputs = FinalInputs {
            video_title: &self.state.video_title,
            video_description: &self.state.video_description,
            text: &self.state.text,
            analysis: self.state.pattern_analysis.as_ref(),
            model: self.state.selected_model(),
            materials: &self.state.materials,
            references: &self.state.selected_references,
        };
        let result = ThumbnailGenerator::new(
            self.synthesizer.as_ref(),
            self.settings.final_reference_limit,
        )
        .generate(&inputs)
        .await;
        self.finish(Job::Thumbnail);
        let generated = result?;

        self.state.generated_images.push(generated.image_url.clone());
        record_quietly(
            self.store.as_ref(),
            ThumbnailRecord::new(&generated.image_url, &generated.prompt, &self.state.video_title),
        )
        .await;
        Ok(generated.image_url)
    }

    /// Edits the most recent generated image; the result is appended and
    /// earlier iterations stay untouched.
    pub async fn refine(&mut self, instruction: &str) -> WorkflowResult<String> {
        let Some(latest) = self.state.latest_generated().map(str::to_string) else {
            return Err(WorkflowError::validation("修正するサムネイルがまだありません"));
        };
        if self.state.in_flight.refining {
            return Err(WorkflowError::Busy(Job::Refine.label()));
        }

        self.state.in_flight.refining = true;
        let result = ThumbnailGenerator::new(
            self.synthesizer.as_ref(),
            self.settings.final_reference_limit,
        )
        .refine(&latest, instruction)
        .await;
        self.finish(Job::Refine);
        let refined = result?;

        self.state.generated_images.push(refined.image_url.clone());
        record_quietly(
            self.store.as_ref(),
            ThumbnailRecord::new(&refined.image_url, &refined.prompt, &self.state.video_title),
        )
        .await;
        Ok(refined.image_url)
    }

    // --- navigation ---

    pub fn can_leave(&self, step: Step) -> WorkflowResult<()> {
        let s = &self.state;
        let blocked = match step {
            Step::Title if s.video_title.is_empty() => Some("動画タイトルを入力してください"),
            Step::References if s.selected_references.is_empty() => {
                Some("参考サムネイルを1枚以上選択してください")
            }
            Step::Patterns if s.pattern_analysis.is_none() => {
                Some("パターン分析を完了してください")
            }
            Step::ModelImages if s.selected_model().is_none() => {
                Some("モデル画像を1枚選択してください")
            }
            Step::Materials if s.text.is_empty() => {
                Some("サムネイルに入れるテキストを入力してください")
            }
            Step::Generate => Some("これ以上進むステップはありません"),
            _ => None,
        };
        match blocked {
            Some(message) => Err(WorkflowError::validation(message)),
            None => Ok(()),
        }
    }

    pub async fn advance_step(&mut self) -> WorkflowResult<Transition> {
        let from = self.state.step;
        self.can_leave(from)?;
        let Some(to) = from.next() else {
            return Err(WorkflowError::validation("これ以上進むステップはありません"));
        };
        self.state.step = to;
        info!("Step {} -> {}", from.number(), to.number());
        Ok(self.on_enter(from, to, Direction::Forward).await)
    }

    pub fn retreat_step(&mut self) -> WorkflowResult<Transition> {
        let from = self.state.step;
        let to = Step::from_number(from.number().saturating_sub(1))
            .ok_or_else(|| WorkflowError::validation("最初のステップです"))?;
        self.go_to_step(to)
    }

    /// Free backward navigation; forward moves must go through
    /// [`WorkflowManager::advance_step`].
    pub fn go_to_step(&mut self, to: Step) -> WorkflowResult<Transition> {
        let from = self.state.step;
        if to > from {
            return Err(WorkflowError::validation("先のステップへは順番に進んでください"));
        }
        self.state.step = to;
        Ok(Transition {
            from,
            to,
            direction: Direction::Backward,
            triggered: None,
            trigger_error: None,
        })
    }

    /// Starts over. Dropping the old state releases every material preview.
    pub fn reset(&mut self) {
        self.materials.release_all(&mut self.state.materials);
        self.state = WorkflowState::default();
        info!("Workflow reset");
    }

    async fn on_enter(&mut self, from: Step, to: Step, direction: Direction) -> Transition {
        let trigger = match direction {
            Direction::Forward => self.pending_trigger(to),
            Direction::Backward => None,
        };

        let trigger_error = match trigger {
            Some(AutoTrigger::ModelImages) => self.generate_model_images().await.err(),
            Some(AutoTrigger::Thumbnail) => self.generate_thumbnail().await.err(),
            None => None,
        };
        if let Some(e) = &trigger_error {
            warn!("Auto-triggered {:?} failed: {}", trigger, e);
        }

        Transition {
            from,
            to,
            direction,
            triggered: trigger,
            trigger_error,
        }
    }

    fn pending_trigger(&self, to: Step) -> Option<AutoTrigger> {
        let s = &self.state;
        match to {
            Step::ModelImages
                if s.pattern_analysis.is_some()
                    && s.model_images.is_empty()
                    && !s.in_flight.generating_models =>
            {
                Some(AutoTrigger::ModelImages)
            }
            Step::Generate
                if s.generated_images.is_empty()
                    && !s.text.is_empty()
                    && !s.in_flight.generating_thumbnail =>
            {
                Some(AutoTrigger::Thumbnail)
            }
            _ => None,
        }
    }

    fn video_context(&self) -> VideoContext<'_> {
        VideoContext {
            title: &self.state.video_title,
            description: &self.state.video_description,
            references: &self.state.selected_references,
        }
    }

    fn begin(&mut self, job: Job) -> WorkflowResult<()> {
        let flag = job.flag(&mut self.state.in_flight);
        if *flag {
            return Err(WorkflowError::Busy(job.label()));
        }
        *flag = true;
        Ok(())
    }

    fn finish(&mut self, job: Job) {
        *job.flag(&mut self.state.in_flight) = false;
    }
}
