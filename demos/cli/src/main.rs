use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use nalgebra::Vector3;

use rsl::{
    asm::Shader,
    grid::{Grid, GridLayout},
    types::Data,
    vm::{Lighting, ShaderInstance, shade_all},
};

/// Shading-language compiler and grid shader
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,

    /// Input file (`.sl` source, assembly, or a `.rslb` bytecode dump)
    #[clap(short, long)]
    input: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Compiles shader source to assembly
    Compile {
        /// Name of a file to write (defaults to stdout)
        #[clap(short, long)]
        out: Option<PathBuf>,
    },

    /// Assembles a shader and writes its bytecode
    Assemble {
        /// Name of a `.rslb` file to write
        #[clap(short, long)]
        out: PathBuf,
    },

    /// Shades a square test plane and writes `Ci` as an image
    Shade {
        #[clap(flatten)]
        settings: ShadeSettings,
    },
}

#[derive(Parser)]
struct ShadeSettings {
    /// Name of a `.png` file to write
    #[clap(short, long)]
    out: Option<PathBuf>,

    /// Image size
    #[clap(short, long, default_value_t = 128)]
    size: u32,

    /// Rows per grid; grids are shaded in parallel
    #[clap(long, default_value_t = NonZeroUsize::new(16).unwrap())]
    rows: NonZeroUsize,

    /// Number of threads to use
    #[clap(short, long)]
    threads: Option<NonZeroUsize>,

    /// Number of times to shade (for benchmarking)
    #[clap(short = 'N', default_value_t = 1)]
    n: usize,

    /// Ambient light intensity
    #[clap(long, default_value_t = 0.1)]
    ambient: f32,

    /// Direction towards a white distant light, as `x,y,z`
    #[clap(long, default_value = "0,0,1")]
    light: String,

    /// Shader parameter override, as `name=value` (vectors as `x y z`)
    #[clap(short, long = "param")]
    params: Vec<String>,
}

////////////////////////////////////////////////////////////////////////////////

fn load(path: &Path) -> Result<Shader> {
    if path.extension().is_some_and(|e| e == "rslb") {
        let f = std::fs::File::open(path)?;
        Ok(bincode::deserialize_from(std::io::BufReader::new(f))?)
    } else {
        Ok(Shader::from_file(path)?)
    }
}

fn parse_vector(s: &str) -> Result<Vector3<f32>> {
    let v = s
        .split(',')
        .map(|c| c.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid vector `{s}`"))?;
    match v.as_slice() {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        _ => bail!("expected three components in `{s}`"),
    }
}

fn instance(shader: Shader, params: &[String]) -> Result<ShaderInstance> {
    let mut out = ShaderInstance::new(Arc::new(shader));
    for p in params {
        let (name, value) = p
            .split_once('=')
            .ok_or_else(|| anyhow!("expected `name=value`, got `{p}`"))?;
        let ty = out
            .shader()
            .symbols()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.ty)
            .ok_or_else(|| anyhow!("shader has no parameter `{name}`"))?;
        let data = Data::parse_literal(ty, value).map_err(|e| anyhow!("{name}: {e}"))?;
        out.set_parameter(name, ty, data);
    }
    Ok(out)
}

/// Builds the strip of the test plane covering rows `y0..y0 + rows`
fn strip(size: usize, y0: usize, rows: usize) -> Grid {
    let layout = GridLayout::new(size, rows);
    let mut g = Grid::plane(layout);
    let scale = if size > 1 { 1.0 / (size - 1) as f32 } else { 0.0 };
    let eye = Vector3::new(0.5, 0.5, 1.0);
    for y in 0..rows {
        let v = (y0 + y) as f32 * scale;
        for x in 0..size {
            let i = layout.index(x, y);
            for name in ["v", "t"] {
                if let Some(f) = g.data_mut(name).and_then(Data::as_floats_mut) {
                    f[i] = v;
                }
            }
            if let Some(dv) = g.data_mut("dv").and_then(Data::as_floats_mut) {
                dv[i] = scale;
            }
            let p = Vector3::new(x as f32 * scale, v, 0.0);
            if let Some(pv) = g.data_mut("P").and_then(Data::as_vectors_mut) {
                pv[i] = p;
            }
            if let Some(iv) = g.data_mut("I").and_then(Data::as_vectors_mut) {
                iv[i] = p - eye;
            }
        }
    }
    g
}

fn run_shade(shader: Shader, settings: &ShadeSettings) -> Result<Vec<u8>> {
    let inst = instance(shader, &settings.params)?;
    let lighting = Lighting::new(Vector3::repeat(settings.ambient))
        .with_light(parse_vector(&settings.light)?, Vector3::repeat(1.0));

    let size = settings.size as usize;
    let rows = settings.rows.get();
    let pool = match settings.threads {
        Some(n) => Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(n.get())
                .build()?,
        ),
        None => None,
    };

    let mut grids = vec![];
    for _ in 0..settings.n {
        grids = (0..size)
            .step_by(rows)
            .map(|y0| strip(size, y0, rows.min(size - y0)))
            .collect::<Vec<_>>();
        let out = match &pool {
            Some(p) => p.install(|| shade_all(&inst, &mut grids, &lighting)),
            None => shade_all(&inst, &mut grids, &lighting),
        };
        let failed = out.iter().filter(|r| r.is_err()).count();
        if let Some(Err(e)) = out.into_iter().find(Result::is_err) {
            bail!("{failed} of {} grids failed: {e}", grids.len());
        }
    }

    let mut image = vec![0u8; size * size * 4];
    for (strip_index, g) in grids.iter().enumerate() {
        let layout = g.layout();
        for y in 0..layout.y_dim {
            for x in 0..layout.x_dim {
                let c = g.vector_at("Ci", x, y).unwrap_or_else(Vector3::zeros);
                let row = strip_index * rows + y;
                // Image rows run top to bottom, `v` runs bottom to top
                let o = ((size - 1 - row) * size + x) * 4;
                for (j, channel) in c.iter().enumerate() {
                    image[o + j] = (channel.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
                image[o + 3] = 255;
            }
        }
    }
    Ok(image)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();
    let args = Args::parse();

    match args.cmd {
        Command::Compile { out } => {
            let src = std::fs::read_to_string(&args.input)?;
            let name = args.input.display().to_string();
            let start = Instant::now();
            let asm = rsl::compiler::compile(&src, &name)?;
            info!("Compiled in {:?}", start.elapsed());
            match out {
                Some(out) => {
                    info!("Writing assembly to {out:?}");
                    std::fs::write(out, asm)?;
                }
                None => print!("{asm}"),
            }
        }
        Command::Assemble { out } => {
            let start = Instant::now();
            let shader = load(&args.input)?;
            info!(
                "Assembled `{}` ({} symbols, {} words) in {:?}",
                shader.name(),
                shader.symbols().len(),
                shader.code().len(),
                start.elapsed()
            );
            info!("Writing bytecode to {out:?}");
            let f = std::fs::File::create(out)?;
            bincode::serialize_into(std::io::BufWriter::new(f), &shader)?;
        }
        Command::Shade { settings } => {
            let shader = load(&args.input)?;
            info!("Loaded {} shader `{}`", shader.ty(), shader.name());
            if settings.size == 0 {
                bail!("image size must be nonzero");
            }
            let start = Instant::now();
            let buffer = run_shade(shader, &settings)?;
            info!(
                "Shaded {}x at {:?} ms/frame",
                settings.n,
                start.elapsed().as_micros() as f64
                    / 1000.0
                    / (settings.n.max(1) as f64)
            );
            match settings.out {
                Some(out) => {
                    info!("Writing image to {out:?}");
                    image::save_buffer(
                        out,
                        &buffer,
                        settings.size,
                        settings.size,
                        image::ColorType::Rgba8,
                    )?;
                }
                None => warn!("no output file given; discarding image"),
            }
        }
    }

    Ok(())
}
