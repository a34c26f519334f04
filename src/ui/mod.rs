//! Terminal front end: walks the six steps with `inquire` menus.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Select, Text};
use std::future::Future;
use std::time::Duration;

use crate::core::error::WorkflowResult;
use crate::core::state::{ChannelType, ReferenceThumbnail, Step, MAX_PER_CATEGORY};
use crate::services::selection::SelectionChange;
use crate::services::workflow::{Transition, WorkflowManager};

const NEXT: &str = "次へ進む";
const BACK: &str = "前へ戻る";
const QUIT: &str = "保存して終了";

enum Flow {
    Continue,
    Quit,
}

pub async fn run(manager: &mut WorkflowManager) -> Result<()> {
    loop {
        let step = manager.state().step;
        println!("\n== ステップ {}/6: {} ==", step.number(), step.label());

        let flow = match step {
            Step::Title => title_step(manager).await?,
            Step::References => references_step(manager).await?,
            Step::Patterns => patterns_step(manager).await?,
            Step::ModelImages => model_step(manager).await?,
            Step::Materials => materials_step(manager).await?,
            Step::Generate => generate_step(manager).await?,
        };

        if let Flow::Quit = flow {
            manager.save_snapshot().await?;
            println!("セッションを保存しました。");
            return Ok(());
        }
    }
}

async fn with_spinner<F: Future>(message: &str, fut: F) -> F::Output {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    let out = fut.await;
    pb.finish_and_clear();
    out
}

fn report<T>(result: WorkflowResult<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            println!("エラー: {}", e);
            None
        }
    }
}

fn report_transition(result: WorkflowResult<Transition>) {
    if let Some(t) = report(result) {
        if let Some(e) = t.trigger_error {
            println!("自動生成に失敗しました: {}", e);
        }
    }
}

async fn advance(manager: &mut WorkflowManager) {
    let message = match manager.state().step {
        Step::Patterns => "モデル画像を生成中...",
        Step::Materials => "サムネイルを生成中...",
        _ => "処理中...",
    };
    report_transition(with_spinner(message, manager.advance_step()).await);
}

/// Handles the entries shared by every menu. Returns `None` when `choice`
/// is step-specific.
async fn common(manager: &mut WorkflowManager, choice: &str) -> Option<Flow> {
    match choice {
        NEXT => advance(manager).await,
        BACK => report_transition(manager.retreat_step()),
        QUIT => return Some(Flow::Quit),
        _ => return None,
    }
    Some(Flow::Continue)
}

async fn title_step(manager: &mut WorkflowManager) -> Result<Flow> {
    let state = manager.state();
    let title = Text::new("動画タイトル:")
        .with_initial_value(&state.video_title)
        .prompt()?;
    let description = Text::new("動画の説明 (任意):")
        .with_initial_value(&state.video_description)
        .prompt()?;
    manager.set_video_info(&title, &description);

    if Confirm::new("次のステップへ進みますか?").with_default(true).prompt()? {
        advance(manager).await;
    }
    Ok(Flow::Continue)
}

async fn references_step(manager: &mut WorkflowManager) -> Result<Flow> {
    const FETCH: &str = "チャンネルから取得";
    const TOGGLE: &str = "候補を選択/解除";

    let state = manager.state();
    println!(
        "選択中: 自分 {}/{} 枚, 競合 {}/{} 枚",
        state.count_of(ChannelType::Own),
        MAX_PER_CATEGORY,
        state.count_of(ChannelType::Competitor),
        MAX_PER_CATEGORY
    );

    let choice = Select::new("操作:", vec![FETCH, TOGGLE, NEXT, BACK, QUIT]).prompt()?;
    if let Some(flow) = common(manager, choice).await {
        return Ok(flow);
    }

    match choice {
        FETCH => {
            let url = Text::new("チャンネルURL:").prompt()?;
            let kinds = vec!["自分のチャンネル", "競合チャンネル"];
            let channel_type = match Select::new("種類:", kinds).prompt()? {
                "自分のチャンネル" => ChannelType::Own,
                _ => ChannelType::Competitor,
            };
            let fetched =
                with_spinner("チャンネルを取得中...", manager.fetch_references(&url, channel_type))
                    .await;
            if let Some(picked) = report(fetched) {
                println!("最新の {} 枚を自動選択しました。", picked);
            }
        }
        TOGGLE => {
            let candidates: Vec<ReferenceThumbnail> = manager
                .state()
                .candidates
                .iter()
                .flat_map(|c| c.thumbnails.iter().cloned())
                .collect();
            if candidates.is_empty() {
                println!("候補がありません。先にチャンネルを取得してください。");
                return Ok(Flow::Continue);
            }
            let labels: Vec<String> = candidates
                .iter()
                .map(|c| {
                    let mark = if manager.state().selected_references.iter().any(|r| r.id == c.id) {
                        "[x]"
                    } else {
                        "[ ]"
                    };
                    format!("{} {} ({})", mark, c.title, c.channel_name)
                })
                .collect();
            let picked = Select::new("サムネイル:", labels).raw_prompt()?;
            match manager.toggle_reference(&candidates[picked.index]) {
                SelectionChange::Rejected => {
                    println!("この種類はすでに上限の {} 枚です。", MAX_PER_CATEGORY)
                }
                SelectionChange::Added | SelectionChange::Removed => {}
            }
        }
        _ => {}
    }
    Ok(Flow::Continue)
}

async fn patterns_step(manager: &mut WorkflowManager) -> Result<Flow> {
    const ANALYZE: &str = "パターン分析を実行";

    if let Some(analysis) = &manager.state().pattern_analysis {
        for (i, p) in analysis.patterns.iter().enumerate() {
            println!("{}. {}: {}", i + 1, p.name, p.description);
        }
        if !analysis.summary.is_empty() {
            println!("傾向: {}", analysis.summary);
        }
    }

    let choice = Select::new("操作:", vec![ANALYZE, NEXT, BACK, QUIT]).prompt()?;
    if let Some(flow) = common(manager, choice).await {
        return Ok(flow);
    }
    if choice == ANALYZE {
        report(with_spinner("参考サムネイルを分析中...", manager.analyze()).await);
    }
    Ok(Flow::Continue)
}

async fn model_step(manager: &mut WorkflowManager) -> Result<Flow> {
    const SELECT: &str = "モデル画像を選択";
    const REVISE: &str = "選択中のモデル画像を修正";
    const REGENERATE: &str = "すべて生成し直す";

    let state = manager.state();
    for (i, m) in state.model_images.iter().enumerate() {
        let mark = if state.selected_model_index == Some(i) { "*" } else { " " };
        println!("{} {}. {} {}", mark, i + 1, m.pattern_name, m.image_url);
    }

    let choice = Select::new("操作:", vec![SELECT, REVISE, REGENERATE, NEXT, BACK, QUIT]).prompt()?;
    if let Some(flow) = common(manager, choice).await {
        return Ok(flow);
    }

    match choice {
        SELECT => {
            let labels: Vec<String> = manager
                .state()
                .model_images
                .iter()
                .map(|m| m.pattern_name.clone())
                .collect();
            if labels.is_empty() {
                println!("モデル画像がありません。");
                return Ok(Flow::Continue);
            }
            let picked = Select::new("モデル画像:", labels).raw_prompt()?;
            report(manager.select_model(picked.index));
        }
        REVISE => {
            let instruction = Text::new("修正内容:").prompt()?;
            let revise = manager.regenerate_selected(&instruction);
            let revised = with_spinner("モデル画像を修正中...", revise).await;
            report(revised);
        }
        REGENERATE => {
            report(with_spinner("モデル画像を生成中...", manager.generate_model_images()).await);
        }
        _ => {}
    }
    Ok(Flow::Continue)
}

async fn materials_step(manager: &mut WorkflowManager) -> Result<Flow> {
    const TEXT: &str = "テキストを入力";
    const ADD: &str = "素材を追加";
    const DESCRIBE: &str = "素材の説明を変更";
    const REMOVE: &str = "素材を削除";

    let state = manager.state();
    if let Some(model) = state.selected_model() {
        println!("必要な素材の提案: {}", model.required_materials.join(", "));
    }
    for m in &state.materials {
        println!("- {} {}", m.file_name, m.description);
    }
    println!("テキスト: {}", if state.text.is_empty() { "(未入力)" } else { &state.text });

    let choice =
        Select::new("操作:", vec![TEXT, ADD, DESCRIBE, REMOVE, NEXT, BACK, QUIT]).prompt()?;
    if let Some(flow) = common(manager, choice).await {
        return Ok(flow);
    }

    match choice {
        TEXT => {
            let mut options: Vec<String> = manager
                .state()
                .selected_model()
                .map(|m| m.suggested_texts.clone())
                .unwrap_or_default();
            const CUSTOM: &str = "自分で入力する";
            options.push(CUSTOM.to_string());
            let picked = Select::new("テキスト:", options).prompt()?;
            let text = if picked == CUSTOM {
                Text::new("テキスト:").prompt()?
            } else {
                picked
            };
            manager.set_text(&text);
        }
        ADD => {
            let path = Text::new("画像ファイルのパス:").prompt()?;
            match tokio::fs::read(path.trim()).await {
                Ok(bytes) => {
                    let file_name = std::path::Path::new(path.trim())
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| path.trim().to_string());
                    let description = Text::new("素材の説明 (任意):").prompt()?;
                    report(manager.add_material(&file_name, bytes, &description));
                }
                Err(e) => println!("ファイルを読み込めません: {}", e),
            }
        }
        DESCRIBE | REMOVE => {
            let items: Vec<(String, String)> = manager
                .state()
                .materials
                .iter()
                .map(|m| (m.id.clone(), m.file_name.clone()))
                .collect();
            if items.is_empty() {
                println!("素材がありません。");
                return Ok(Flow::Continue);
            }
            let labels: Vec<String> = items.iter().map(|(_, name)| name.clone()).collect();
            let picked = Select::new("素材:", labels).raw_prompt()?;
            let id = &items[picked.index].0;
            if choice == DESCRIBE {
                let description = Text::new("説明:").prompt()?;
                report(manager.describe_material(id, &description));
            } else {
                manager.remove_material(id);
            }
        }
        _ => {}
    }
    Ok(Flow::Continue)
}

async fn generate_step(manager: &mut WorkflowManager) -> Result<Flow> {
    const REFINE: &str = "修正する";
    const GENERATE: &str = "もう一度生成";
    const RESET: &str = "最初からやり直す";

    let state = manager.state();
    for (i, url) in state.generated_images.iter().enumerate() {
        println!("{}. {}", i + 1, url);
    }

    let choice = Select::new("操作:", vec![REFINE, GENERATE, RESET, BACK, QUIT]).prompt()?;
    if let Some(flow) = common(manager, choice).await {
        return Ok(flow);
    }

    match choice {
        REFINE => {
            let instruction = Text::new("修正内容:").prompt()?;
            let refined = with_spinner("サムネイルを修正中...", manager.refine(&instruction)).await;
            if let Some(url) = report(refined) {
                println!("完成: {}", url);
            }
        }
        GENERATE => {
            let generated =
                with_spinner("サムネイルを生成中...", manager.generate_thumbnail()).await;
            if let Some(url) = report(generated) {
                println!("完成: {}", url);
            }
        }
        RESET => {
            if Confirm::new("すべての入力を破棄しますか?").with_default(false).prompt()? {
                manager.reset();
                manager.discard_snapshot().await?;
            }
        }
        _ => {}
    }
    Ok(Flow::Continue)
}
