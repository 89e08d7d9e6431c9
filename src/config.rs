//! Run-time parameters for the planner and the multigrid solver.
//!
//! Parameters are read from a TOML document with a `[fabarray]` and an
//! `[mg]` table. Every key is optional. Command-line style overrides of the
//! form `section.key=value` are layered on top of the document before it is
//! deserialized, so they are subject to the same type checking.

use std::path::Path;
use log::debug;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};




static GLOBAL: OnceCell<Inputs> = OnceCell::new();




/**
 * Parameters of the communication planner and its two plan caches. A max
 * size of -1 means unbounded.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub verbose: bool,
    pub do_async_sends: bool,
    pub do_not_use_cache: bool,
    pub use_copy_cache: bool,
    pub copy_cache_max_size: i64,
    pub use_fb_cache: bool,
    pub fb_cache_max_size: i64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            verbose: true,
            do_async_sends: false,
            do_not_use_cache: false,
            use_copy_cache: true,
            copy_cache_max_size: 50,
            use_fb_cache: true,
            fb_cache_max_size: 50,
        }
    }
}

impl PlannerConfig {

    /**
     * Apply the rules that switch caches off: a max size that is zero or
     * negative (other than -1) disables that cache, and `do_not_use_cache`
     * disables both.
     */
    pub fn normalized(mut self) -> Self {
        if self.copy_cache_max_size <= 0 && self.copy_cache_max_size != -1 {
            self.use_copy_cache = false;
        }
        if self.fb_cache_max_size <= 0 && self.fb_cache_max_size != -1 {
            self.use_fb_cache = false;
        }
        if self.do_not_use_cache {
            self.use_copy_cache = false;
            self.use_fb_cache = false;
        }
        self
    }
}




/**
 * How a coarse-level correction is carried back to the finer level.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Each fine cell takes the value of its coarse parent.
    Constant,
    /// Each fine cell blends its parent with the parent's neighbours, 3/4
    /// and 1/4 per axis.
    Linear,
}




/**
 * Parameters of the multigrid solver.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultigridConfig {
    /// 0 is silent, 1 reports the outcome of a solve, 2 reports every cycle.
    pub verbose: u32,
    /// Number of outer cycles.
    pub maxiter: usize,
    /// Run exactly `maxiter` cycles and skip the convergence test.
    pub fixed_iter: bool,
    /// Number of times the next coarser level is visited per cycle. One
    /// gives a V-cycle, two a W-cycle.
    pub nu_0: usize,
    /// Smoother passes on the way down.
    pub nu_1: usize,
    /// Smoother passes on the way up.
    pub nu_2: usize,
    /// Smoother passes at the bottom when the Krylov solver is off or fails.
    pub nu_f: usize,
    /// Extra smoother passes after the bottom solve.
    pub nu_b: usize,
    /// Use conjugate gradients at the bottom.
    pub usecg: bool,
    pub rtol_b: f64,
    /// Absolute tolerance of the bottom solve; negative disables it.
    pub atol_b: f64,
    pub maxiter_b: usize,
    #[serde(alias = "numLevelsMAX")]
    pub max_levels: usize,
    /// Include an operator norm estimate times the solution norm in the
    /// convergence target.
    #[serde(alias = "use_Anorm_for_convergence")]
    pub use_operator_norm: bool,
    pub smooth_on_cg_unstable: bool,
    pub interpolation: Interpolation,
}

impl Default for MultigridConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            maxiter: 40,
            fixed_iter: false,
            nu_0: 1,
            nu_1: 2,
            nu_2: 2,
            nu_f: 8,
            nu_b: 0,
            usecg: true,
            rtol_b: 0.01,
            atol_b: -1.0,
            maxiter_b: 80,
            max_levels: 1024,
            use_operator_norm: false,
            smooth_on_cg_unstable: true,
            interpolation: Interpolation::Linear,
        }
    }
}

impl MultigridConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_levels == 0 {
            return Err(Error::Config("mg.max_levels must be at least 1".into()));
        }
        if self.nu_0 == 0 {
            return Err(Error::Config("mg.nu_0 must be at least 1".into()));
        }
        if !(self.rtol_b >= 0.0) {
            return Err(Error::Config(format!("mg.rtol_b must be non-negative, got {}", self.rtol_b)));
        }
        Ok(())
    }
}




/**
 * The full set of run-time parameters.
 */
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inputs {
    pub fabarray: PlannerConfig,
    pub mg: MultigridConfig,
}




// ============================================================================
impl Inputs {

    /**
     * Parse a TOML document, then apply overrides of the form
     * `section.key=value`. Override values are parsed as TOML values when
     * possible (`true`, `12`, `1e-3`) and taken as strings otherwise.
     */
    pub fn from_str_with_overrides<S: AsRef<str>>(source: &str, overrides: &[S]) -> Result<Self> {
        let mut table: toml::Table = source.parse()?;

        for item in overrides {
            let item = item.as_ref();
            let (path, value) = item
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("override '{}' is not of the form key=value", item)))?;
            let (section, key) = path
                .trim()
                .split_once('.')
                .ok_or_else(|| Error::Config(format!("override key '{}' has no section", path)))?;

            debug!("override {}.{} = {}", section, key, value.trim());

            let section = table
                .entry(section.to_string())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));

            match section {
                toml::Value::Table(section) => {
                    section.insert(key.to_string(), parse_value(value.trim()));
                }
                _ => return Err(Error::Config(format!("'{}' is not a table", path))),
            }
        }

        let inputs: Inputs = toml::Value::Table(table).try_into()?;
        inputs.mg.validate()?;
        Ok(inputs)
    }


    pub fn from_file<P: AsRef<Path>, S: AsRef<str>>(path: P, overrides: &[S]) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_str_with_overrides(&source, overrides)
    }
}

impl std::str::FromStr for Inputs {
    type Err = Error;

    fn from_str(source: &str) -> Result<Self> {
        Self::from_str_with_overrides::<&str>(source, &[])
    }
}

fn parse_value(text: &str) -> toml::Value {
    format!("value = {}", text)
        .parse::<toml::Table>()
        .ok()
        .and_then(|mut t| t.remove("value"))
        .unwrap_or_else(|| toml::Value::String(text.to_string()))
}




/**
 * Install the process-wide inputs. Only the first call has any effect;
 * returns whether this call was the one that installed them.
 */
pub fn initialize(inputs: Inputs) -> bool {
    GLOBAL.set(inputs).is_ok()
}




/**
 * Return the process-wide inputs, installing the defaults if `initialize`
 * has not been called.
 */
pub fn global() -> &'static Inputs {
    GLOBAL.get_or_init(Inputs::default)
}
