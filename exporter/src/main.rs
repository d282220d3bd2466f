use clap::{Args, Parser, Subcommand, ValueEnum};
use rosacore::electrode::TipAnchor;
use rosacore::export::CoordinateSystem;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::{report_failures, AutofitOutputs, Runner};

mod volume;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "ROSA case export, contact generation and QC")]
struct Cli {
    /// Load workflow options from YAML
    #[arg(long, global = true)]
    workflow: Option<PathBuf>,
    /// Root reference volume for IMAGERY_3DREF chains (default: first display)
    #[arg(long, global = true)]
    root_volume: Option<String>,
    /// Electrode models JSON (default: bundled DIXI D08 library)
    #[arg(long, global = true)]
    electrode_library: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct RosArg {
    /// Path to the case `.ros` file
    #[arg(long)]
    ros: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum Coord {
    Ras,
    Lps,
}

impl From<Coord> for CoordinateSystem {
    fn from(value: Coord) -> Self {
        match value {
            Coord::Ras => CoordinateSystem::Ras,
            Coord::Lps => CoordinateSystem::Lps,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TipAt {
    Target,
    Entry,
}

impl From<TipAt> for TipAnchor {
    fn from(value: TipAt) -> Self {
        match value {
            TipAt::Target => TipAnchor::Target,
            TipAt::Entry => TipAnchor::Entry,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// List volumes, composed display matrices and trajectories
    List {
        #[command(flatten)]
        ros: RosArg,
    },
    /// Export trajectory lines as Slicer .mrk.json
    Markups {
        #[command(flatten)]
        ros: RosArg,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum)]
        coord: Option<Coord>,
        /// Express points in this display's frame (inverse composed matrix)
        #[arg(long)]
        volume_name: Option<String>,
    },
    /// Export trajectory endpoints as Slicer .fcsv
    Fcsv {
        #[command(flatten)]
        ros: RosArg,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum)]
        coord: Option<Coord>,
        /// Use the trajectory name for both endpoints
        #[arg(long, default_value_t = false)]
        same_label_pair: bool,
    },
    /// Export one volume transform as ITK .tfm (ROSA/LPS unless --ras)
    Tfm {
        #[command(flatten)]
        ros: RosArg,
        #[arg(long)]
        volume_name: String,
        #[arg(long)]
        out: PathBuf,
        /// Write the RAS (host) matrix instead of the default LPS one
        #[arg(long, default_value_t = false)]
        ras: bool,
        /// Invert the matrix before writing (overrides the workflow setting)
        #[arg(long, default_value_t = false)]
        invert: bool,
    },
    /// Write an editable trajectory -> electrode assignment template
    ContactsTemplate {
        #[command(flatten)]
        ros: RosArg,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        default_model_id: Option<String>,
        #[arg(long, value_enum, default_value = "target")]
        default_tip_at: TipAt,
    },
    /// Generate contact positions from assignments
    ContactsGenerate {
        #[command(flatten)]
        ros: RosArg,
        #[arg(long)]
        assignments: PathBuf,
        #[arg(long)]
        out_rosa_json: PathBuf,
        #[arg(long)]
        out_fcsv: Option<PathBuf>,
        #[arg(long)]
        out_markups: Option<PathBuf>,
    },
    /// Suggest an electrode model per trajectory from its length
    Suggest {
        #[command(flatten)]
        ros: RosArg,
    },
    /// Write contacts in RAS and LPS columns
    Aligned {
        #[command(flatten)]
        ros: RosArg,
        #[arg(long)]
        assignments: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Fit assigned electrodes to a post-operative CT (NIfTI)
    Autofit {
        #[command(flatten)]
        ros: RosArg,
        #[arg(long)]
        assignments: PathBuf,
        #[arg(long)]
        ct: PathBuf,
        /// Display the CT was exported from; its composed matrix maps voxels to the root frame
        #[arg(long)]
        ct_volume: Option<String>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        out_contacts: Option<PathBuf>,
        #[arg(long)]
        out_qc: Option<PathBuf>,
        /// Apply low-confidence fits too
        #[arg(long, default_value_t = false)]
        apply_all: bool,
    },
    /// Planned-versus-final QC as CSV
    Qc {
        #[command(flatten)]
        ros: RosArg,
        #[arg(long)]
        assignments: PathBuf,
        /// Fit report from `autofit`, or a JSON list of trajectories
        #[arg(long)]
        final_trajectories: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let workflow_config = match &cli.workflow {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::default(),
    }
    .with_overrides(cli.root_volume.clone(), cli.electrode_library.clone());
    log::debug!(
        "[export] reference={:?} library={}",
        workflow_config.reference_volume,
        workflow_config.library_label()
    );
    let default_coord = workflow_config.coordinate_system;
    let runner = Runner::new(workflow_config);
    let coord_or_default = |c: Option<Coord>| c.map_or(default_coord, CoordinateSystem::from);

    match cli.command {
        Command::List { ros } => {
            print!("{}", runner.list(&ros.ros)?);
        }
        Command::Markups {
            ros,
            out,
            coord,
            volume_name,
        } => {
            let count = runner.markups(&ros.ros, &out, coord_or_default(coord), volume_name.as_deref())?;
            println!("Wrote {} ({count} trajectories)", out.display());
        }
        Command::Fcsv {
            ros,
            out,
            coord,
            same_label_pair,
        } => {
            let count = runner.fcsv(&ros.ros, &out, coord_or_default(coord), same_label_pair)?;
            println!("Wrote {} ({count} points)", out.display());
        }
        Command::Tfm {
            ros,
            volume_name,
            out,
            ras,
            invert,
        } => {
            runner.tfm(&ros.ros, &volume_name, &out, ras, invert.then_some(true))?;
            println!("Wrote {}", out.display());
        }
        Command::ContactsTemplate {
            ros,
            out,
            default_model_id,
            default_tip_at,
        } => {
            let rows = runner.contacts_template(
                &ros.ros,
                &out,
                default_model_id.as_deref(),
                default_tip_at.into(),
            )?;
            println!("Wrote {} ({rows} trajectory rows)", out.display());
        }
        Command::ContactsGenerate {
            ros,
            assignments,
            out_rosa_json,
            out_fcsv,
            out_markups,
        } => {
            let summary = runner.contacts_generate(
                &ros.ros,
                &assignments,
                &out_rosa_json,
                out_fcsv.as_deref(),
                out_markups.as_deref(),
            )?;
            println!(
                "Wrote {} ({} contacts in ROSA_LPS, {} trajectories)",
                out_rosa_json.display(),
                summary.contacts,
                summary.trajectories
            );
            if let Some(path) = out_fcsv {
                println!("Wrote {} ({} points in RAS)", path.display(), summary.contacts);
            }
            if let Some(path) = out_markups {
                println!("Wrote {} (markups fiducials)", path.display());
            }
            report_failures(&summary.failures);
        }
        Command::Suggest { ros } => {
            for (name, outcome) in runner.suggest(&ros.ros)? {
                match outcome {
                    Ok(s) => println!(
                        "{name}: {} (length {:.2} mm, residual {:.2} mm)",
                        s.model_id, s.trajectory_length_mm, s.residual_mm
                    ),
                    Err(err) => println!("{name}: no suggestion ({err})"),
                }
            }
        }
        Command::Aligned {
            ros,
            assignments,
            out,
        } => {
            let (count, failures) = runner.aligned(&ros.ros, &assignments, &out)?;
            println!("Wrote {} ({count} contacts)", out.display());
            report_failures(&failures);
        }
        Command::Autofit {
            ros,
            assignments,
            ct,
            ct_volume,
            out,
            out_contacts,
            out_qc,
            apply_all,
        } => {
            let outputs = AutofitOutputs {
                fits: out,
                contacts: out_contacts,
                qc_csv: out_qc,
            };
            let summary = runner.autofit(
                &ros.ros,
                &assignments,
                &ct,
                ct_volume.as_deref(),
                apply_all,
                &outputs,
            )?;
            println!(
                "Wrote {} ({} fits, {} applied)",
                outputs.fits.display(),
                summary.fitted,
                summary.applied
            );
            if let Some(path) = &outputs.contacts {
                println!("Wrote {}", path.display());
            }
            if let Some(path) = &outputs.qc_csv {
                println!("Wrote {} ({} QC rows)", path.display(), summary.qc_records);
            }
            for name in &summary.low_confidence {
                eprintln!("  low confidence: {name}");
            }
            report_failures(&summary.failures);
        }
        Command::Qc {
            ros,
            assignments,
            final_trajectories,
            out,
        } => {
            let (records, failures) =
                runner.qc(&ros.ros, &assignments, &final_trajectories, &out)?;
            println!("Wrote {} ({} QC rows)", out.display(), records.len());
            report_failures(&failures);
        }
    }

    Ok(())
}
