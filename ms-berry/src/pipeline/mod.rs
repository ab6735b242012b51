//! 完整模拟流程: 多模态对齐, 模板配准, 病灶图生成与精化, 病灶模拟.
//!
//! 配准与重采样等步骤通过 [`ToolRunner`] 调用外部工具完成, 其余步骤使用本 crate 的算法.
//!
//! | 步骤 | 内容 |
//! |:---:|:---|
//! | 1 | 选择参考空间 (T1, T2, T2-FLAIR, PD 中第一个提供的) |
//! | 2 | 其余模态刚性 + 仿射配准到参考空间 |
//! | 3 | 选择 MNI152 模板 |
//! | 4 | 模板非线性配准到参考空间 |
//! | 5 | 在模板上生成病灶图, 重采样到参考空间 |
//! | 6 | 按模态精化病灶图 |
//! | 7 | 模拟单次检查或纵向随访 |
//! | 8 | (可选) 重采样回各模态的原始空间 |
//! | 9 | 清理工作目录 |

mod error;
pub mod params;
pub mod tools;

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use snafu::{OptionExt, ResultExt};

pub use error::{PipelineError, PipelineResult};
pub use params::{BsplineGrid, InitMode, Refinement, SimulationParams};
pub use tools::{CliParams, CliValue, ProcessRunner, Tool, ToolConfig, ToolError, ToolRunner};

use error::{
    CopyOutputSnafu, CreateDirSnafu, DatabaseSnafu, NoReferenceSnafu, RunToolSnafu,
    SimulateSnafu, VolumeSnafu,
};
use tools::{ensure_output, presets};

use crate::consts::MM3_PER_ML;
use crate::dataset::{DatabaseLayout, LesionCatalog, LesionSource};
use crate::sim::deform::deform;
use crate::sim::longitudinal::{simulate_follow_ups, write_follow_ups};
use crate::sim::mask::generate_mask;
use crate::sim::refine::{filter_mask, restrict_to};
use crate::sim::Modality;
use crate::{LesionMask, MriVolume};

/// 流程总步数.
const STEPS: usize = 9;

#[inline]
fn step(i: usize, what: &str) {
    tracing::info!("Step {i}/{STEPS}: {what}");
}

/// 完整错误链的单行描述.
fn describe(e: PipelineError) -> String {
    snafu::Report::from_error(e).to_string()
}

/// 单个模态的处理结果.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalityOutcome {
    /// 模态.
    pub modality: Modality,
    /// 精化后的病灶标签文件.
    pub label: Option<PathBuf>,
    /// 模拟结果文件 (单次检查 1 个, 纵向随访每个时间点 1 个).
    pub outputs: Vec<PathBuf>,
    /// 失败原因. 该模态被跳过时非空.
    pub error: Option<String>,
}

impl ModalityOutcome {
    fn failed(modality: Modality, e: PipelineError) -> Self {
        let error = describe(e);
        tracing::warn!(%modality, %error, "modality skipped");
        Self {
            modality,
            label: None,
            outputs: Vec::new(),
            error: Some(error),
        }
    }

    /// 该模态是否处理成功?
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 流程运行结果.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    /// 参考空间模态.
    pub reference: Modality,
    /// 目标病灶负荷 (ml).
    pub desired_load: f64,
    /// 模板上实际生成的病灶负荷 (ml).
    pub achieved_load: f64,
    /// 放置的病灶个数.
    pub lesions: usize,
    /// 各模态结果, 按 [`Modality::ALL`] 的顺序.
    pub outcomes: Vec<ModalityOutcome>,
    /// 保留下来的工作目录.
    pub work_dir: Option<PathBuf>,
}

impl SimulationReport {
    /// 全部模拟结果文件.
    pub fn outputs(&self) -> impl Iterator<Item = &Path> {
        self.outcomes
            .iter()
            .flat_map(|o| o.outputs.iter().map(PathBuf::as_path))
    }

    /// 成功处理的模态个数.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }
}

/// 参考空间中的一个模态.
#[derive(Debug)]
struct Conformed {
    modality: Modality,
    /// 原始输入.
    original: PathBuf,
    /// 参考空间中的扫描. 参考模态即原始输入.
    volume: PathBuf,
    /// 到参考空间的线性变换. 参考模态没有.
    transform: Option<PathBuf>,
}

/// 完整流程的执行器.
pub struct Simulator<'a, T: ?Sized, S: ?Sized> {
    runner: &'a T,
    layout: &'a DatabaseLayout,
    source: &'a S,
    catalog: LesionCatalog,
}

impl<'a, T, S> Simulator<'a, T, S>
where
    T: ToolRunner + ?Sized,
    S: LesionSource + ?Sized,
{
    /// 使用标准病灶分组.
    pub fn new(runner: &'a T, layout: &'a DatabaseLayout, source: &'a S) -> Self {
        Self {
            runner,
            layout,
            source,
            catalog: LesionCatalog::standard(),
        }
    }

    /// 替换病灶分组.
    pub fn with_catalog(mut self, catalog: LesionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// 执行完整流程.
    ///
    /// 单个模态的对齐, 精化或模拟失败只会跳过该模态; 参考空间, 模板配准与病灶图生成失败时返回 `Err`.
    pub fn run(&self, params: &SimulationParams) -> PipelineResult<SimulationReport> {
        params.validate()?;
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        step(1, "reference space");
        let (reference, ref_path) = params.reference().context(NoReferenceSnafu)?;
        tracing::info!(%reference, path = %ref_path.display(), "reference modality selected");

        let out_dir = params.output_dir.as_path();
        fs::create_dir_all(out_dir).context(CreateDirSnafu { path: out_dir })?;
        let work = tempfile::Builder::new()
            .prefix("ms-lesion-")
            .tempdir()
            .context(CreateDirSnafu {
                path: std::env::temp_dir(),
            })?;
        let work_dir = work.path();

        step(2, "conform modalities to reference space");
        let mut outcomes = Vec::new();
        let mut conformed = vec![Conformed {
            modality: reference,
            original: ref_path.to_path_buf(),
            volume: ref_path.to_path_buf(),
            transform: None,
        }];
        for (m, path) in params.inputs() {
            if m == reference {
                continue;
            }
            match self.conform(m, path, ref_path, work_dir) {
                Ok(c) => conformed.push(c),
                Err(e) => outcomes.push(ModalityOutcome::failed(m, e)),
            }
        }

        step(3, "select template");
        let template_path = self.layout.template(params.brain_extracted);
        let template = self
            .layout
            .load_template(params.brain_extracted)
            .context(DatabaseSnafu)?;
        tracing::info!(path = %template_path.display(), "template loaded");

        step(4, "non-linear registration of template");
        let bspline = work_dir.join("template_to_reference_bspline.h5");
        let warped = work_dir.join("template_in_reference.nii.gz");
        let grid = params.bspline_grid.to_string();
        self.run_tool(
            "non-linear registration",
            Tool::Registration,
            &presets::bspline(
                ref_path,
                &template_path,
                &bspline,
                &warped,
                params.sampling_percentage,
                &grid,
                params.init_mode.as_str(),
            ),
            &[bspline.as_path()],
        )?;

        step(5, "generate lesion map");
        let report = generate_mask(
            &template,
            self.source,
            &self.catalog,
            params.lesion_load,
            params.mask_strategy,
            &mut rng,
        )
        .context(SimulateSnafu {
            what: "lesion map",
        })?;
        let template_map = work_dir.join("lesion_map_template.nii.gz");
        report
            .mask
            .save(&template_map)
            .context(VolumeSnafu { path: &template_map })?;
        let map_path = work_dir.join("lesion_map.nii.gz");
        self.run_tool(
            "lesion map resampling",
            Tool::Resample,
            &presets::resample(&template_map, ref_path, &map_path, &bspline, false, true),
            &[map_path.as_path()],
        )?;
        let mut map = LesionMask::open(&map_path).context(VolumeSnafu { path: &map_path })?;
        map.binarize();
        tracing::info!(
            voxels = map.count_foreground(),
            volume_ml = map.volume_ml(),
            "lesion map in reference space"
        );

        step(6, "refine lesion map");
        let wm = match params.refinement {
            params::Refinement::IntensityFilter => None,
            params::Refinement::WhiteMatter => {
                Some(self.white_matter(reference, ref_path, work_dir)?)
            }
        };
        let mut refined = Vec::with_capacity(conformed.len());
        for c in conformed {
            match self.refine(&c, &map, wm.as_ref(), params) {
                Ok((volume, label, path)) => refined.push((c, volume, label, path)),
                Err(e) => outcomes.push(ModalityOutcome::failed(c.modality, e)),
            }
        }

        step(7, "simulate lesions");
        let mut done = Vec::with_capacity(refined.len());
        for (c, volume, label, label_path) in refined {
            match self.simulate(c.modality, &volume, &label, params, &mut rng) {
                Ok(outputs) => done.push((c, label_path, outputs)),
                Err(e) => outcomes.push(ModalityOutcome::failed(c.modality, e)),
            }
        }

        step(8, "return to original space");
        for (c, label_path, outputs) in done {
            let r = if params.return_original_space {
                self.return_to_original(&c, &label_path, &outputs, work_dir)
            } else {
                Ok(())
            };
            match r {
                Ok(()) => outcomes.push(ModalityOutcome {
                    modality: c.modality,
                    label: Some(label_path),
                    outputs,
                    error: None,
                }),
                Err(e) => outcomes.push(ModalityOutcome::failed(c.modality, e)),
            }
        }
        if !params.return_original_space {
            tracing::info!("outputs kept in reference space");
        }

        step(9, "cleanup");
        let work_dir = if params.keep_intermediates {
            #[allow(deprecated)]
            let kept = work.into_path();
            tracing::info!(path = %kept.display(), "intermediate files kept");
            Some(kept)
        } else {
            let path = work.path().to_path_buf();
            if let Err(error) = work.close() {
                tracing::warn!(path = %path.display(), %error, "could not remove working directory");
            }
            None
        };

        outcomes.sort_by_key(|o| o.modality);
        let ans = SimulationReport {
            reference,
            desired_load: params.lesion_load,
            achieved_load: report.achieved_load / MM3_PER_ML,
            lesions: report.placed,
            outcomes,
            work_dir,
        };
        tracing::info!(
            succeeded = ans.succeeded(),
            total = ans.outcomes.len(),
            achieved_load = ans.achieved_load,
            "simulation finished"
        );
        Ok(ans)
    }

    /// 执行外部工具, 并检查其输出文件.
    fn run_tool(
        &self,
        step: &'static str,
        tool: Tool,
        params: &CliParams,
        outputs: &[&Path],
    ) -> PipelineResult<()> {
        self.runner
            .run(tool, params)
            .and_then(|_| outputs.iter().try_for_each(|p| ensure_output(tool, p)))
            .context(RunToolSnafu { step, tool })
    }

    fn conform(
        &self,
        modality: Modality,
        input: &Path,
        reference: &Path,
        work: &Path,
    ) -> PipelineResult<Conformed> {
        let tag = modality.file_tag();
        let transform = work.join(format!("{tag}_to_reference.h5"));
        let volume = work.join(format!("{tag}_conformed.nii.gz"));
        self.run_tool(
            "conform",
            Tool::Registration,
            &presets::conform(reference, input, &transform, &volume),
            &[volume.as_path(), transform.as_path()],
        )?;
        tracing::info!(%modality, "conformed to reference space");
        Ok(Conformed {
            modality,
            original: input.to_path_buf(),
            volume,
            transform: Some(transform),
        })
    }

    /// 去噪, 偏置场校正, 白质分类与标签平滑. 返回参考空间中的白质掩膜.
    fn white_matter(
        &self,
        modality: Modality,
        reference: &Path,
        work: &Path,
    ) -> PipelineResult<LesionMask> {
        let denoised = work.join("reference_denoised.nii.gz");
        let corrected = work.join("reference_bias_corrected.nii.gz");
        let wm = work.join("white_matter.nii.gz");
        let smoothed = work.join("white_matter_smoothed.nii.gz");

        let chain = [
            (Tool::NoiseFilter, presets::noise_filter(reference, &denoised), &denoised),
            (Tool::BiasCorrection, presets::bias_correction(&denoised, &corrected), &corrected),
            (Tool::TissueClassifier, presets::white_matter(&corrected, &wm, modality.as_str()), &wm),
            (Tool::LabelSmoothing, presets::label_smoothing(&wm, &smoothed), &smoothed),
        ];
        for (tool, params, out) in &chain {
            self.run_tool("white matter segmentation", *tool, params, &[out.as_path()])?;
        }

        let mut mask = LesionMask::open(&smoothed).context(VolumeSnafu { path: &smoothed })?;
        mask.binarize();
        tracing::info!(voxels = mask.count_foreground(), "white matter mask ready");
        Ok(mask)
    }

    fn refine(
        &self,
        c: &Conformed,
        map: &LesionMask,
        wm: Option<&LesionMask>,
        params: &SimulationParams,
    ) -> PipelineResult<(MriVolume, LesionMask, PathBuf)> {
        let what = format!("{} refinement", c.modality);
        let volume = MriVolume::open(&c.volume).context(VolumeSnafu { path: &c.volume })?;
        let label = match wm {
            None => {
                filter_mask(&volume, map, params.cut_factor)
                    .context(SimulateSnafu { what })?
                    .mask
            }
            Some(wm) => {
                let mut label = map.clone();
                restrict_to(&mut label, wm).context(SimulateSnafu { what })?;
                label
            }
        };
        let path = params
            .output_dir
            .join(format!("{}_lesion_label.nii.gz", c.modality.file_tag()));
        label.save(&path).context(VolumeSnafu { path: &path })?;
        tracing::info!(modality = %c.modality, voxels = label.count_foreground(), "lesion label written");
        Ok((volume, label, path))
    }

    fn simulate(
        &self,
        modality: Modality,
        volume: &MriVolume,
        label: &LesionMask,
        params: &SimulationParams,
        rng: &mut StdRng,
    ) -> PipelineResult<Vec<PathBuf>> {
        let what = format!("{modality} lesions");
        if params.longitudinal {
            let lp = params.longitudinal_params(modality);
            let follow_ups = simulate_follow_ups(volume, label, &lp, rng)
                .context(SimulateSnafu { what: what.clone() })?;
            return write_follow_ups(params.follow_up_dir(), &lp, &follow_ups)
                .context(SimulateSnafu { what });
        }

        let out = deform(volume, label, &params.deform_params(modality), rng)
            .context(SimulateSnafu { what })?;
        let path = params
            .output_dir
            .join(format!("{}_lesion.nii.gz", modality.file_tag()));
        out.save(&path).context(VolumeSnafu { path: &path })?;
        tracing::info!(%modality, path = %path.display(), "lesion image written");
        Ok(vec![path])
    }

    /// 用逆线性变换把标签与模拟结果重采样回原始网格, 原地覆盖.
    fn return_to_original(
        &self,
        c: &Conformed,
        label: &Path,
        outputs: &[PathBuf],
        work: &Path,
    ) -> PipelineResult<()> {
        let Some(transform) = &c.transform else {
            return Ok(());
        };
        let files = std::iter::once((label, true)).chain(outputs.iter().map(|p| (p.as_path(), false)));
        for (file, label_map) in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let tmp = work.join(format!("original_{name}"));
            self.run_tool(
                "return to original space",
                Tool::Resample,
                &presets::resample(file, &c.original, &tmp, transform, true, label_map),
                &[tmp.as_path()],
            )?;
            fs::copy(&tmp, file).context(CopyOutputSnafu { path: file })?;
        }
        tracing::info!(modality = %c.modality, files = outputs.len() + 1, "returned to original space");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ndarray::Array3;

    use super::*;
    use crate::dataset::{MemoryLesionSource, SizeGroup};
    use crate::NiftiHeaderAttr;

    const SHAPE: crate::Idx3d = (12, 12, 12);

    /// 记录调用, 并像真实工具一样生成输出文件. 各网格相同, 配准与重采样直接复制.
    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<(Tool, CliParams)>>,
        fail_moving: Option<PathBuf>,
    }

    impl RecordingRunner {
        fn tools(&self) -> Vec<Tool> {
            self.calls.borrow().iter().map(|(t, _)| *t).collect()
        }
    }

    impl ToolRunner for RecordingRunner {
        fn run(&self, tool: Tool, params: &CliParams) -> Result<(), ToolError> {
            self.calls.borrow_mut().push((tool, params.clone()));
            let copy = |from: &str, to: &str| {
                fs::copy(params.path(from).unwrap(), params.path(to).unwrap()).unwrap();
            };
            match tool {
                Tool::Registration => {
                    if params.path("movingVolume") == self.fail_moving.as_deref() {
                        return Err(ToolError::Failed {
                            tool,
                            code: Some(1),
                            stderr: "registration diverged".into(),
                        });
                    }
                    copy("movingVolume", "outputVolume");
                    for key in ["linearTransform", "bsplineTransform"] {
                        if let Some(t) = params.path(key) {
                            fs::write(t, b"transform").unwrap();
                        }
                    }
                }
                Tool::Resample | Tool::NoiseFilter | Tool::LabelSmoothing => {
                    copy("inputVolume", "outputVolume")
                }
                Tool::BiasCorrection => copy("inputImageName", "outputImageName"),
                Tool::TissueClassifier => {
                    let v = MriVolume::open(params.path("inputVolume").unwrap()).unwrap();
                    let mut wm = LesionMask::zeros_like(&v);
                    let depth = v.shape().0;
                    wm.data_mut()
                        .indexed_iter_mut()
                        .filter(|((z, _, _), _)| *z < depth / 2)
                        .for_each(|(_, p)| *p = 1);
                    wm.save(params.path("outputLabel").unwrap()).unwrap();
                }
            }
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        layout: DatabaseLayout,
        source: MemoryLesionSource,
        catalog: LesionCatalog,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let textured = |base: f32, step: f32| {
                let data = Array3::from_shape_fn(SHAPE, |(z, h, w)| {
                    base + step * ((z * 7 + h * 3 + w) % 5) as f32
                });
                MriVolume::synthetic(data, [1.0; 3])
            };
            textured(100.0, 1.0).save(dir.path().join("t2.nii.gz")).unwrap();
            textured(0.5, 0.01).save_f32(dir.path().join("fa.nii.gz")).unwrap();

            let layout = DatabaseLayout::new(dir.path().join("db"));
            fs::create_dir_all(layout.root()).unwrap();
            textured(50.0, 2.0).save(layout.template(false)).unwrap();

            // 唯一的病灶由两个 3x3x3 立方体组成, 放置结果与随机种子无关.
            let lesion = Array3::from_shape_fn(SHAPE, |(z, h, w)| {
                let near = |c: usize| [z, h, w].iter().all(|v| v.abs_diff(c) <= 1);
                u8::from(near(3) || near(8))
            });
            let mut source = MemoryLesionSource::new();
            source.insert("small", 0, LesionMask::synthetic(lesion, [1.0; 3]));
            let catalog = LesionCatalog::new(vec![SizeGroup::new("small", 1, 60)]);
            Self {
                dir,
                layout,
                source,
                catalog,
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn params(&self) -> SimulationParams {
            SimulationParams {
                t2: Some(self.path("t2.nii.gz")),
                dti_fa: Some(self.path("fa.nii.gz")),
                output_dir: self.path("out"),
                seed: Some(17),
                ..SimulationParams::default()
            }
        }

        fn run(&self, runner: &RecordingRunner, params: &SimulationParams) -> PipelineResult<SimulationReport> {
            Simulator::new(runner, &self.layout, &self.source)
                .with_catalog(self.catalog.clone())
                .run(params)
        }
    }

    #[test]
    fn test_single_exam() {
        let fx = Fixture::new();
        let runner = RecordingRunner::default();
        let report = fx.run(&runner, &fx.params()).unwrap();

        assert_eq!(report.reference, Modality::T2);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.lesions, 1);
        assert!((report.achieved_load - 0.054).abs() < 1e-9);
        assert!(report.work_dir.is_none());

        let out = fx.path("out");
        for name in ["T2_lesion.nii.gz", "FA_lesion.nii.gz", "T2_lesion_label.nii.gz", "FA_lesion_label.nii.gz"] {
            assert!(out.join(name).is_file(), "{name} missing");
        }
        let t2 = MriVolume::open(out.join("T2_lesion.nii.gz")).unwrap();
        assert_eq!(t2.shape(), SHAPE);

        assert_eq!(
            runner.tools(),
            vec![Tool::Registration, Tool::Registration, Tool::Resample]
        );
        let calls = runner.calls.borrow();
        let conform = &calls[0].1;
        assert_eq!(conform.path("movingVolume"), Some(fx.path("fa.nii.gz").as_path()));
        assert_eq!(conform.path("fixedVolume"), Some(fx.path("t2.nii.gz").as_path()));
        let bspline = &calls[1].1;
        assert_eq!(bspline.path("movingVolume"), Some(fx.layout.template(false).as_path()));
        assert_eq!(bspline.get("splineGridSize"), Some(&CliValue::Str("5,5,5".into())));
        assert_eq!(calls[2].1.get("pixelType"), Some(&CliValue::Str("binary".into())));
    }

    #[test]
    fn test_conform_failure_skips_modality() {
        let fx = Fixture::new();
        let runner = RecordingRunner {
            fail_moving: Some(fx.path("fa.nii.gz")),
            ..Default::default()
        };
        let report = fx.run(&runner, &fx.params()).unwrap();
        assert_eq!(report.outcomes.len(), 2);
        let t2 = &report.outcomes[0];
        let fa = &report.outcomes[1];
        assert_eq!(t2.modality, Modality::T2);
        assert!(t2.is_ok());
        assert_eq!(fa.modality, Modality::DtiFa);
        assert!(fa.error.as_deref().unwrap().contains("registration diverged"));
        assert!(!fx.path("out").join("FA_lesion.nii.gz").exists());
    }

    #[test]
    fn test_template_registration_is_fatal() {
        let fx = Fixture::new();
        let runner = RecordingRunner {
            fail_moving: Some(fx.layout.template(false)),
            ..Default::default()
        };
        assert!(matches!(
            fx.run(&runner, &fx.params()),
            Err(PipelineError::RunTool {
                step: "non-linear registration",
                ..
            })
        ));
    }

    #[test]
    fn test_longitudinal_white_matter_original_space() {
        let fx = Fixture::new();
        let runner = RecordingRunner::default();
        let params = SimulationParams {
            longitudinal: true,
            follow_ups: 3,
            follow_up_dir: Some(fx.path("follow")),
            refinement: Refinement::WhiteMatter,
            return_original_space: true,
            keep_intermediates: true,
            ..fx.params()
        };
        let report = fx.run(&runner, &params).unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.outputs().count(), 6);
        for t in 1..=3 {
            assert!(fx.path("follow").join(format!("volT2_TimePoint_{t}.nii.gz")).is_file());
            assert!(fx.path("follow").join(format!("volDTI-FA_TimePoint_{t}.nii.gz")).is_file());
        }

        // 白质在上半部分, 第二个立方体 (z = 7..=9) 被移除.
        let label = LesionMask::open(fx.path("out").join("T2_lesion_label.nii.gz")).unwrap();
        assert_eq!(label.count_foreground(), 27);

        let tools = runner.tools();
        assert_eq!(
            &tools[3..7],
            &[
                Tool::NoiseFilter,
                Tool::BiasCorrection,
                Tool::TissueClassifier,
                Tool::LabelSmoothing
            ]
        );
        // FA 的标签与 3 个随访被逆变换回原始空间.
        let inverse: Vec<_> = runner
            .calls
            .borrow()
            .iter()
            .filter(|(_, p)| p.get("inverseTransform") == Some(&CliValue::Flag(true)))
            .map(|(_, p)| p.path("referenceVolume").unwrap().to_path_buf())
            .collect();
        assert_eq!(inverse.len(), 4);
        assert!(inverse.iter().all(|p| *p == fx.path("fa.nii.gz")));

        let work = report.work_dir.unwrap();
        assert!(work.join("lesion_map.nii.gz").is_file());
        fs::remove_dir_all(work).unwrap();
    }

    #[test]
    fn test_no_reference() {
        let fx = Fixture::new();
        let runner = RecordingRunner::default();
        let params = SimulationParams {
            t2: None,
            ..fx.params()
        };
        assert!(matches!(
            fx.run(&runner, &params),
            Err(PipelineError::NoReference)
        ));
        assert!(runner.calls.borrow().is_empty());
    }
}
