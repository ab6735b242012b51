//! 运行结果.

use ms_berry::data::stats::Statistics;
use ms_berry::pipeline::SimulationReport;
use std::io::{self, Write};
use std::path::PathBuf;

const S4: &str = "    ";

/// 子命令的运行结果.
#[derive(Debug)]
pub enum Summary {
    /// 病灶掩膜生成.
    Mask {
        path: PathBuf,
        desired: f64,
        achieved: f64,
        placed: usize,
        rejected: usize,
    },
    /// 掩膜精化. 强度过滤时附带统计结果与保留区间.
    Filter {
        path: PathBuf,
        initial: f64,
        remaining: f64,
        stats: Option<(Statistics, (f64, f64))>,
    },
    /// 病灶雕刻.
    Carve {
        path: PathBuf,
        requested: usize,
        carved: usize,
        draws: usize,
    },
    /// 写出的文件.
    Written(Vec<PathBuf>),
    /// 强度统计.
    Stats(Statistics),
    /// 生效的 JSON 配置.
    Config(String),
    /// 完整流程.
    Simulation(SimulationReport),
}

fn describe_stats<W: Write>(s: &Statistics, w: &mut W) -> io::Result<()> {
    writeln!(w, "{S4}Voxels: {}", s.count)?;
    writeln!(w, "{S4}Mean: {:.6}", s.mean)?;
    writeln!(w, "{S4}Std: {:.6}", s.std())?;
    write!(w, "{S4}Range: [{:.6}, {:.6}]", s.min, s.max)
}

impl Summary {
    /// 将结果写进 `w` 中.
    pub fn describe_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Summary::Mask {
                path,
                desired,
                achieved,
                placed,
                rejected,
            } => {
                writeln!(w, "Lesion mask `{}`:", path.display())?;
                writeln!(w, "{S4}Desired load: {desired} voxels")?;
                writeln!(w, "{S4}Achieved load: {achieved} voxels")?;
                write!(w, "{S4}Lesions placed: {placed}, draws rejected: {rejected}")
            }
            Summary::Filter {
                path,
                initial,
                remaining,
                stats,
            } => {
                writeln!(w, "Refined mask `{}`:", path.display())?;
                writeln!(w, "{S4}Initial volume: {initial:.2} mm3")?;
                write!(w, "{S4}Final volume: {remaining:.2} mm3")?;
                if let Some((s, (lo, hi))) = stats {
                    writeln!(w)?;
                    writeln!(w, "{S4}Kept intensities: ({lo:.6}, {hi:.6})")?;
                    describe_stats(s, w)?;
                }
                Ok(())
            }
            Summary::Carve {
                path,
                requested,
                carved,
                draws,
            } => {
                writeln!(w, "Carved volume `{}`:", path.display())?;
                write!(w, "{S4}Lesions: {carved} of {requested} after {draws} draws")
            }
            Summary::Written(paths) => {
                write!(w, "Files written:")?;
                for p in paths {
                    write!(w, "\n{S4}{}", p.display())?;
                }
                Ok(())
            }
            Summary::Stats(s) => {
                writeln!(w, "Statistics:")?;
                describe_stats(s, w)
            }
            Summary::Config(json) => write!(w, "{json}"),
            Summary::Simulation(r) => {
                writeln!(w, "Simulation (reference {}):", r.reference)?;
                writeln!(
                    w,
                    "{S4}Lesion load: {:.3} ml of {:.3} ml desired, {} lesions",
                    r.achieved_load, r.desired_load, r.lesions
                )?;
                for o in &r.outcomes {
                    match &o.error {
                        None => writeln!(w, "{S4}{}: {} file(s)", o.modality, o.outputs.len())?,
                        Some(e) => writeln!(w, "{S4}{}: skipped ({e})", o.modality)?,
                    }
                    for p in o.label.iter().chain(&o.outputs) {
                        writeln!(w, "{S4}{S4}{}", p.display())?;
                    }
                }
                match &r.work_dir {
                    Some(d) => write!(w, "{S4}Intermediate files: {}", d.display()),
                    None => write!(w, "{S4}Intermediate files removed"),
                }
            }
        }
    }

    /// 渲染为最终输出的文本: 结果前后各加一行分隔线. JSON 配置原样输出.
    pub fn render(&self) -> io::Result<String> {
        if let Summary::Config(json) = self {
            return Ok(format!("{json}\n"));
        }
        let mut buf = Vec::with_capacity(512);
        utils::sep_to(&mut buf)?;
        self.describe_into(&mut buf)?;
        writeln!(buf)?;
        utils::sep_to(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// 打印结果.
    pub fn print(&self) {
        match self.render() {
            Ok(text) => print!("{text}"),
            Err(e) => tracing::error!("could not format summary: {e}"),
        }
    }
}
