use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use namrig::engine::{Pipeline, PipelineSettings};
use namrig::presets::{AbSlot, HostKind};
use std::path::PathBuf;

const USAGE: &str = "usage: namrig_render <in.wav> <out.wav> [--model FILE] [--model-b FILE] \
[--ir FILE] [--ir-b FILE] [--settings FILE.json] [--block N] [--hosted]";

struct Args {
    input: PathBuf,
    output: PathBuf,
    model_a: Option<PathBuf>,
    model_b: Option<PathBuf>,
    ir_a: Option<PathBuf>,
    ir_b: Option<PathBuf>,
    settings: Option<PathBuf>,
    block: usize,
    hosted: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut positional = Vec::new();
    let mut parsed = Args {
        input: PathBuf::new(),
        output: PathBuf::new(),
        model_a: None,
        model_b: None,
        ir_a: None,
        ir_b: None,
        settings: None,
        block: 256,
        hosted: false,
    };
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{flag} needs a value\n{USAGE}"))
        };
        match arg.as_str() {
            "--model" => parsed.model_a = Some(value("--model")?.into()),
            "--model-b" => parsed.model_b = Some(value("--model-b")?.into()),
            "--ir" => parsed.ir_a = Some(value("--ir")?.into()),
            "--ir-b" => parsed.ir_b = Some(value("--ir-b")?.into()),
            "--settings" => parsed.settings = Some(value("--settings")?.into()),
            "--block" => {
                parsed.block = value("--block")?
                    .parse()
                    .context("--block must be a positive integer")?
            }
            "--hosted" => parsed.hosted = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    if positional.len() != 2 || parsed.block == 0 {
        bail!(USAGE);
    }
    parsed.output = positional.pop().unwrap_or_default();
    parsed.input = positional.pop().unwrap_or_default();
    Ok(parsed)
}

fn read_wav(path: &PathBuf) -> Result<(Vec<Vec<f32>>, u32)> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open input WAV '{}'", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };
    let mut planes = vec![Vec::with_capacity(samples.len() / channels); channels];
    for frame in samples.chunks_exact(channels) {
        for (plane, s) in planes.iter_mut().zip(frame) {
            plane.push(*s);
        }
    }
    Ok((planes, spec.sample_rate))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args()?;

    let mut settings = match &args.settings {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read settings '{}'", path.display()))?;
            serde_json::from_str::<PipelineSettings>(&text)
                .with_context(|| format!("malformed settings '{}'", path.display()))?
        }
        None => PipelineSettings::default(),
    };
    settings.host = if args.hosted {
        HostKind::Hosted
    } else {
        HostKind::Standalone
    };

    let (planes, sample_rate) = read_wav(&args.input)?;
    let (mut pipeline, mut controller) = Pipeline::new();
    pipeline.reset(sample_rate as f32, args.block);

    let loads = [
        (AbSlot::A, &args.model_a, &args.ir_a),
        (AbSlot::B, &args.model_b, &args.ir_b),
    ];
    for (slot, model, ir) in loads {
        if let Some(path) = model {
            controller
                .load_model(slot, path)
                .with_context(|| format!("failed to load model '{}'", path.display()))?;
        }
        if let Some(path) = ir {
            controller
                .load_ir(slot, path)
                .with_context(|| format!("failed to load IR '{}'", path.display()))?;
        }
    }

    let frames = planes[0].len();
    let mut left = vec![0.0f32; frames];
    let mut right = vec![0.0f32; frames];
    let mut peak = 0.0f32;
    let mut latency = 0;
    let mut start = 0;
    while start < frames {
        let end = (start + args.block).min(frames);
        let input: Vec<&[f32]> = planes.iter().map(|p| &p[start..end]).collect();
        let report = pipeline
            .process(
                &settings,
                &input,
                &mut [&mut left[start..end], &mut right[start..end]],
            )
            .context("pipeline rejected the block")?;
        if report.needs_service {
            controller.poll();
        }
        peak = peak.max(report.output_peak);
        latency = report.latency_samples;
        start = end;
    }

    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&args.output, spec)
        .with_context(|| format!("failed to create '{}'", args.output.display()))?;
    for (l, r) in left.iter().zip(right.iter()) {
        writer.write_sample(*l)?;
        writer.write_sample(*r)?;
    }
    writer.finalize()?;

    let meters = pipeline.meters();
    println!("Render summary for '{}':", args.input.display());
    println!("  frames processed : {}", frames);
    println!("  sample rate      : {} Hz", sample_rate);
    println!("  latency          : {} samples", latency);
    println!("  output peak      : {:.2} dBFS", 20.0 * peak.max(1e-6).log10());
    println!("  momentary loud.  : {:.1} LUFS", meters.get_loudness_lufs());
    Ok(())
}
