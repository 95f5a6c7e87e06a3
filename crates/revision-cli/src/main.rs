use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use revision_contracts::events::EventWriter;
use revision_contracts::failure::FailureKind;
use revision_contracts::pipeline::ProcessingContext;
use revision_contracts::receipts::{build_receipt, write_receipt, ReceiptRequest};
use revision_engine::errors::error_chain_text;
use revision_engine::parser::parse_analysis_response;
use revision_engine::prompt::build_analysis_prompt;
use revision_engine::validator::{parse_marked_areas, validate_request};
use revision_engine::{PipelineConfig, PipelineError, RevisionPipeline};
use serde_json::{json, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DRYRUN_ANALYSIS_MODEL: &str = "dryrun-analysis-1";
const DRYRUN_GENERATION_MODEL: &str = "dryrun-image-1";

#[derive(Debug, Parser)]
#[command(name = "revision-rs", version, about = "Revision photo editing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full pipeline on one photo.
    Process(ProcessArgs),
    /// Print the analysis prompt for a set of marked areas.
    Prompt(PromptArgs),
    /// Check a photo and its marked areas without calling any model.
    Validate(ValidateArgs),
    /// Parse a raw analysis response.
    Parse(ParseArgs),
}

#[derive(Debug, Clone, Parser)]
struct AreaArgs {
    /// JSON file holding an array of marked areas.
    #[arg(long)]
    areas: Option<PathBuf>,
    /// One area as `x,y,width,height[:description]`, fractions of the image size.
    #[arg(long = "area")]
    area: Vec<String>,
}

#[derive(Debug, Parser)]
struct ProcessArgs {
    #[arg(long)]
    image: PathBuf,
    #[command(flatten)]
    areas: AreaArgs,
    #[arg(long)]
    instructions: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    analysis_model: Option<String>,
    #[arg(long)]
    generation_model: Option<String>,
    /// Route both stages to the offline dryrun client.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct PromptArgs {
    #[command(flatten)]
    areas: AreaArgs,
    #[arg(long)]
    instructions: Option<String>,
}

#[derive(Debug, Parser)]
struct ValidateArgs {
    #[arg(long)]
    image: PathBuf,
    #[command(flatten)]
    areas: AreaArgs,
}

#[derive(Debug, Parser)]
struct ParseArgs {
    /// File with the raw response; stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("revision-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Process(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(run_process(args, PipelineConfig::from_env()))
        }
        Command::Prompt(args) => run_prompt(args),
        Command::Validate(args) => run_validate(args),
        Command::Parse(args) => run_parse(args),
    }
}

async fn run_process(args: ProcessArgs, config: PipelineConfig) -> Result<i32> {
    let image = fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let areas = load_areas(&args.areas)?;
    let context = process_context(&args);

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session_id = format!("cli-{}", std::process::id());
    let pipeline = RevisionPipeline::builder()
        .config(config)
        .events(EventWriter::new(events_path, session_id))
        .build();

    let source_bytes = image.len();
    let result = match pipeline.process(image, &areas, &context).await {
        Ok(result) => result,
        Err(err) => {
            tracing::debug!(error = %error_chain_text(&err, 800), "pipeline failed");
            eprintln!("{}", err.user_message());
            eprintln!("detail: {err}");
            return Ok(exit_code(&err));
        }
    };

    let request_id = result.metadata().request_id.clone();
    let extension = image_extension(result.generated_image());
    let image_path = args.out.join(format!("edited-{request_id}.{extension}"));
    fs::write(&image_path, result.generated_image())
        .with_context(|| format!("failed to write {}", image_path.display()))?;

    let receipt_path = args.out.join(format!("receipt-{request_id}.json"));
    let typed_areas = parse_marked_areas(&areas, &pipeline.config().limits)
        .context("marked areas changed after validation")?;
    let receipt = build_receipt(
        &ReceiptRequest {
            source_image: &args.image,
            source_bytes,
            marked_areas: &typed_areas,
            context: &context,
        },
        &result,
        &image_path,
        &receipt_path,
    );
    write_receipt(&receipt_path, &receipt)
        .with_context(|| format!("failed to write {}", receipt_path.display()))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "request_id": request_id,
            "is_fallback": result.is_fallback(),
            "failure_reason": result.metadata().failure_reason,
            "analysis_prompt": result.analysis_prompt(),
            "image_path": image_path.display().to_string(),
            "receipt_path": receipt_path.display().to_string(),
            "processing_time_ms": result.processing_time_ms(),
        }))?
    );
    Ok(0)
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    let areas = load_areas(&args.areas)?;
    let limits = PipelineConfig::from_env().limits;
    let typed = match parse_marked_areas(&areas, &limits) {
        Ok(typed) => typed,
        Err(err) => {
            eprintln!("{err}");
            return Ok(2);
        }
    };
    println!("{}", build_analysis_prompt(&typed, args.instructions.as_deref()));
    Ok(0)
}

fn run_validate(args: ValidateArgs) -> Result<i32> {
    let image = fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let areas = load_areas(&args.areas)?;
    let limits = PipelineConfig::from_env().limits;
    let (report, code) = match validate_request(&image, &areas, &limits) {
        Ok(validated) => (
            json!({
                "ok": true,
                "mime_type": validated.mime_type(),
                "image_bytes": image.len(),
                "marked_areas": validated.marked_areas,
            }),
            0,
        ),
        Err(err) => (
            json!({
                "ok": false,
                "code": err.code(),
                "message": err.to_string(),
            }),
            2,
        ),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(code)
}

fn run_parse(args: ParseArgs) -> Result<i32> {
    let raw = match args.input.as_ref() {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };
    let analysis = parse_analysis_response(&raw);
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(0)
}

fn process_context(args: &ProcessArgs) -> ProcessingContext {
    let mut context = ProcessingContext::new();
    if let Some(instructions) = args.instructions.as_deref() {
        context = context.with_user_instructions(instructions);
    }
    let (analysis_model, generation_model) = if args.dryrun {
        (
            Some(DRYRUN_ANALYSIS_MODEL.to_string()),
            Some(DRYRUN_GENERATION_MODEL.to_string()),
        )
    } else {
        (args.analysis_model.clone(), args.generation_model.clone())
    };
    if let Some(model) = analysis_model {
        context = context.with_analysis_model(model);
    }
    if let Some(model) = generation_model {
        context = context.with_generation_model(model);
    }
    context
}

fn load_areas(args: &AreaArgs) -> Result<Vec<Value>> {
    let mut areas = Vec::new();
    if let Some(path) = args.areas.as_ref() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        match parsed {
            Value::Array(rows) => areas.extend(rows),
            Value::Object(_) => areas.push(parsed),
            _ => bail!("{} must hold a JSON array of areas", path.display()),
        }
    }
    for raw in &args.area {
        areas.push(parse_area_arg(raw)?);
    }
    Ok(areas)
}

fn parse_area_arg(raw: &str) -> Result<Value> {
    let (geometry, description) = match raw.split_once(':') {
        Some((geometry, description)) => (geometry, Some(description.trim())),
        None => (raw, None),
    };
    let numbers = geometry
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("invalid number '{}' in --area {raw}", part.trim()))
        })
        .collect::<Result<Vec<f64>>>()?;
    let [x, y, width, height] = numbers[..] else {
        bail!("--area expects x,y,width,height; got '{raw}'");
    };
    let mut area = json!({ "x": x, "y": y, "width": width, "height": height });
    if let Some(description) = description.filter(|value| !value.is_empty()) {
        area["description"] = Value::String(description.to_string());
    }
    Ok(area)
}

fn exit_code(err: &PipelineError) -> i32 {
    match err.kind() {
        FailureKind::Validation => 2,
        FailureKind::Quota | FailureKind::Auth => 3,
        FailureKind::Network | FailureKind::Unknown => 1,
    }
}

fn image_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use revision_contracts::failure::ValidationError;
    use revision_engine::{PipelineConfig, PipelineError, RetryPolicy};
    use serde_json::{json, Value};

    use super::{
        exit_code, image_extension, load_areas, parse_area_arg, process_context, run_process,
        AreaArgs, ProcessArgs,
    };

    fn jpeg() -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.resize(256, 0);
        bytes
    }

    #[test]
    fn area_argument_accepts_optional_description() {
        assert_eq!(
            parse_area_arg("0.1,0.2,0.3,0.4").unwrap(),
            json!({"x": 0.1, "y": 0.2, "width": 0.3, "height": 0.4})
        );
        assert_eq!(
            parse_area_arg("0.1, 0.2, 0.3, 0.4: red car ").unwrap()["description"],
            "red car"
        );
        assert!(parse_area_arg("0.1,0.2,0.3").is_err());
        assert!(parse_area_arg("a,b,c,d").is_err());
    }

    #[test]
    fn areas_file_and_flags_are_combined() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("areas.json");
        fs::write(&path, r#"[{"x": 0.5, "y": 0.5, "width": 0.1, "height": 0.1}]"#)?;
        let areas = load_areas(&AreaArgs {
            areas: Some(path),
            area: vec!["0.1,0.1,0.2,0.2".to_string()],
        })?;
        assert_eq!(areas.len(), 2);
        assert_eq!(areas[0]["x"], 0.5);
        Ok(())
    }

    #[test]
    fn dryrun_overrides_model_flags() {
        let args = ProcessArgs {
            image: "photo.jpg".into(),
            areas: AreaArgs {
                areas: None,
                area: Vec::new(),
            },
            instructions: Some("remove the sign".to_string()),
            out: "out".into(),
            events: None,
            analysis_model: Some("gemini-2.5-pro".to_string()),
            generation_model: None,
            dryrun: true,
        };
        let context = process_context(&args);
        assert_eq!(context.analysis_model.as_deref(), Some("dryrun-analysis-1"));
        assert_eq!(context.generation_model.as_deref(), Some("dryrun-image-1"));
        assert_eq!(context.user_instructions(), Some("remove the sign"));
    }

    #[test]
    fn generated_png_gets_png_extension() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(image_extension(&png), "png");
        assert_eq!(image_extension(b"???"), "bin");
    }

    #[tokio::test]
    async fn dryrun_process_writes_image_receipt_and_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("photo.jpg");
        fs::write(&image_path, jpeg())?;
        let out = temp.path().join("out");
        let args = ProcessArgs {
            image: image_path,
            areas: AreaArgs {
                areas: None,
                area: vec!["0.1,0.1,0.2,0.2:lamp".to_string()],
            },
            instructions: None,
            out: out.clone(),
            events: None,
            analysis_model: None,
            generation_model: None,
            dryrun: true,
        };
        let config = PipelineConfig {
            retry: RetryPolicy::default().with_delay(Duration::ZERO),
            ..PipelineConfig::default()
        };
        assert_eq!(run_process(args, config).await?, 0);

        let mut names: Vec<String> = fs::read_dir(&out)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), 3);
        assert!(names[0].starts_with("edited-req-") && names[0].ends_with(".png"));
        assert_eq!(names[1], "events.jsonl");
        assert!(names[2].starts_with("receipt-req-"));

        let receipt: Value = serde_json::from_str(&fs::read_to_string(out.join(&names[2]))?)?;
        assert_eq!(receipt["schema_version"], 1);
        assert_eq!(receipt["metadata"]["is_fallback"], false);
        assert_eq!(receipt["metadata"]["analysis_model"], "dryrun-analysis-1");
        assert_eq!(receipt["request"]["marked_areas"][0]["description"], "lamp");
        Ok(())
    }

    #[tokio::test]
    async fn validation_failure_maps_to_exit_code_two() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("empty.jpg");
        fs::write(&image_path, b"")?;
        let args = ProcessArgs {
            image: image_path,
            areas: AreaArgs {
                areas: None,
                area: Vec::new(),
            },
            instructions: None,
            out: temp.path().join("out"),
            events: None,
            analysis_model: None,
            generation_model: None,
            dryrun: true,
        };
        assert_eq!(run_process(args, PipelineConfig::default()).await?, 2);
        Ok(())
    }

    #[test]
    fn exit_codes_follow_failure_kind() {
        assert_eq!(
            exit_code(&PipelineError::Validation(ValidationError::UnsupportedFormat)),
            2
        );
    }
}
