//! Graph descriptors in rrdgraph syntax.
//!
//! [`GraphDescriptor::build`] derives the plot primitives for a `.rrd`
//! file: one `DEF` per data source against the first archive, one extra
//! `DEF` per further archive, and a default `LINE1` for every data source
//! the caller does not already draw. Rendering the image is left to a
//! [`GraphRenderer`].
//!
//! ```text
//! DEF:Temp=rrd/climate.rrd:temp:AVERAGE
//! DEF:Temp_MAX_12=rrd/climate.rrd:temp:MAX:step=3600
//! LINE1:Temp#00FF00:Temp
//! ```

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, error};

use crate::config::{GraphConfig, check_image_size};
use crate::error::{GraphError, Result};
use crate::info::RrdInfo;
use crate::schema::ConsolidationFn;

/// Colors of the default lines, assigned in data source order.
pub const PALETTE: [&str; 8] = [
    "#00FF00", "#0033FF", "#FF0000", "#FF9900", "#9900FF", "#00CCCC", "#FF00FF", "#996633",
];

/// One rrdgraph argument.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotPrimitive {
    /// `DEF:vname=file:ds:CF[:step=N]`
    Def {
        /// Variable name.
        vname: String,
        /// Path of the `.rrd` file.
        rrd_file: String,
        /// Data source name.
        ds_name: String,
        /// Consolidation function.
        cf: ConsolidationFn,
        /// Requested resolution in seconds.
        step: Option<u64>,
    },
    /// `CDEF:vname=RPN`
    CDef {
        /// Variable name.
        vname: String,
        /// RPN expression.
        expression: String,
    },
    /// `LINE{width}:vname[#color][:legend]`
    Line {
        /// Line width.
        width: u32,
        /// Variable drawn.
        vname: String,
        /// Color, including the leading `#`.
        color: Option<String>,
        /// Legend text.
        legend: Option<String>,
    },
    /// `AREA:vname[#color][:legend]`
    Area {
        /// Variable drawn.
        vname: String,
        /// Color, including the leading `#`.
        color: Option<String>,
        /// Legend text.
        legend: Option<String>,
    },
    /// Anything else, passed through untouched.
    Raw(String),
}

impl PlotPrimitive {
    /// Whether this argument draws or derives from `vname`.
    ///
    /// Matches when the rendered argument mentions `vname` alongside a
    /// `LINE`, `AREA` or `CDEF` keyword, however it parsed.
    pub fn references(&self, vname: &str) -> bool {
        let rendered = self.to_string();
        rendered.contains(vname)
            && ["LINE", "AREA", "CDEF"]
                .iter()
                .any(|keyword| rendered.contains(keyword))
    }
}

impl From<&str> for PlotPrimitive {
    fn from(arg: &str) -> Self {
        parse_primitive(arg).unwrap_or_else(|| Self::Raw(arg.to_string()))
    }
}

impl FromStr for PlotPrimitive {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

fn parse_primitive(arg: &str) -> Option<PlotPrimitive> {
    if let Some(rest) = arg.strip_prefix("DEF:") {
        let (vname, source) = rest.split_once('=')?;
        let (source, step) = match source.rsplit_once(":step=") {
            Some((source, step)) => (source, Some(step.parse().ok()?)),
            None => (source, None),
        };
        let (source, cf) = source.rsplit_once(':')?;
        let (rrd_file, ds_name) = source.rsplit_once(':')?;
        return Some(PlotPrimitive::Def {
            vname: vname.to_string(),
            rrd_file: rrd_file.to_string(),
            ds_name: ds_name.to_string(),
            cf: cf.parse().ok()?,
            step,
        });
    }

    if let Some(rest) = arg.strip_prefix("CDEF:") {
        let (vname, expression) = rest.split_once('=')?;
        return Some(PlotPrimitive::CDef {
            vname: vname.to_string(),
            expression: expression.to_string(),
        });
    }

    if let Some(rest) = arg.strip_prefix("AREA:") {
        let (vname, color, legend) = split_drawing(rest)?;
        return Some(PlotPrimitive::Area {
            vname,
            color,
            legend,
        });
    }

    if let Some(rest) = arg.strip_prefix("LINE") {
        let (width, rest) = rest.split_once(':')?;
        let width = if width.is_empty() { 1 } else { width.parse().ok()? };
        let (vname, color, legend) = split_drawing(rest)?;
        return Some(PlotPrimitive::Line {
            width,
            vname,
            color,
            legend,
        });
    }

    None
}

/// Splits `vname[#color][:legend]`.
///
/// Options past the legend (`:STACK`, `:dashes`) are not modelled.
fn split_drawing(spec: &str) -> Option<(String, Option<String>, Option<String>)> {
    let (head, legend) = match spec.split_once(':') {
        Some((_, legend)) if legend.contains(':') => return None,
        Some((head, legend)) => (head, Some(legend.to_string())),
        None => (spec, None),
    };
    let (vname, color) = match head.split_once('#') {
        Some((vname, color)) => (vname, Some(format!("#{color}"))),
        None => (head, None),
    };
    if vname.is_empty() {
        return None;
    }
    Some((vname.to_string(), color, legend))
}

impl fmt::Display for PlotPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Def {
                vname,
                rrd_file,
                ds_name,
                cf,
                step,
            } => {
                write!(f, "DEF:{vname}={rrd_file}:{ds_name}:{cf}")?;
                if let Some(step) = step {
                    write!(f, ":step={step}")?;
                }
                Ok(())
            }
            Self::CDef { vname, expression } => write!(f, "CDEF:{vname}={expression}"),
            Self::Line {
                width,
                vname,
                color,
                legend,
            } => {
                write!(f, "LINE{width}:{vname}")?;
                write_drawing_tail(f, color.as_deref(), legend.as_deref())
            }
            Self::Area {
                vname,
                color,
                legend,
            } => {
                write!(f, "AREA:{vname}")?;
                write_drawing_tail(f, color.as_deref(), legend.as_deref())
            }
            Self::Raw(raw) => f.write_str(raw),
        }
    }
}

fn write_drawing_tail(
    f: &mut fmt::Formatter<'_>,
    color: Option<&str>,
    legend: Option<&str>,
) -> fmt::Result {
    if let Some(color) = color {
        f.write_str(color)?;
    }
    if let Some(legend) = legend {
        write!(f, ":{legend}")?;
    }
    Ok(())
}

/// Capitalizes the first character and lowercases the rest.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// The full argument list for one graph.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphDescriptor {
    defs: Vec<PlotPrimitive>,
    lines: Vec<PlotPrimitive>,
    args: Vec<PlotPrimitive>,
}

impl GraphDescriptor {
    /// Derives the primitives for the file described by `info`.
    ///
    /// Output order is definitions, default lines, then `args`.
    pub fn build(info: &RrdInfo, args: &[PlotPrimitive]) -> Self {
        let Some(primary) = info.archives.first() else {
            return Self {
                args: args.to_vec(),
                ..Self::default()
            };
        };

        let mut defs = Vec::new();
        let mut lines = Vec::new();
        for (index, ds) in info.data_sources.iter().enumerate() {
            let vname = capitalize(&ds.name);
            defs.push(PlotPrimitive::Def {
                vname: vname.clone(),
                rrd_file: info.filename.clone(),
                ds_name: ds.name.clone(),
                cf: primary.cf,
                step: None,
            });
            for rra in info.archives.iter().skip(1) {
                defs.push(PlotPrimitive::Def {
                    vname: format!("{vname}_{}_{}", rra.cf, rra.pdp_per_row),
                    rrd_file: info.filename.clone(),
                    ds_name: ds.name.clone(),
                    cf: rra.cf,
                    step: Some(rra.pdp_per_row.saturating_mul(info.step)),
                });
            }

            if !args.iter().any(|arg| arg.references(&vname)) {
                lines.push(PlotPrimitive::Line {
                    width: 1,
                    vname: vname.clone(),
                    color: Some(PALETTE[index % PALETTE.len()].to_string()),
                    legend: Some(vname),
                });
            }
        }

        debug!(
            file = %info.filename,
            defs = defs.len(),
            lines = lines.len(),
            "built graph descriptor"
        );
        Self {
            defs,
            lines,
            args: args.to_vec(),
        }
    }

    /// Every primitive in output order.
    pub fn primitives(&self) -> impl Iterator<Item = &PlotPrimitive> {
        self.defs.iter().chain(&self.lines).chain(&self.args)
    }

    /// Renders every primitive to its argument string.
    pub fn to_args(&self) -> Vec<String> {
        self.primitives().map(ToString::to_string).collect()
    }
}

/// Turns primitives into an image.
pub trait GraphRenderer {
    /// Renders `primitives` at `width` x `height` over `window`, a
    /// `(start, end)` pair of Unix seconds.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Render`] if the backend fails.
    fn render(
        &self,
        primitives: &[PlotPrimitive],
        width: u32,
        height: u32,
        window: (u64, u64),
        options: &[String],
    ) -> std::result::Result<Vec<u8>, GraphError>;
}

/// A configured graph of one database file.
#[derive(Debug, Clone)]
pub struct Graph {
    config: GraphConfig,
    unique_id: String,
    step: u64,
    timerange: u64,
    descriptor: GraphDescriptor,
}

impl Graph {
    /// Builds the graph from its configuration and the file metadata.
    ///
    /// # Errors
    ///
    /// Returns a config error on bad image dimensions or a duration error
    /// if the time range does not resolve to seconds.
    pub fn new(config: GraphConfig, info: &RrdInfo) -> Result<Self> {
        config.validate()?;
        let timerange = config.timerange.as_seconds()?;
        let args: Vec<PlotPrimitive> = config
            .args
            .iter()
            .map(|arg| PlotPrimitive::from(arg.as_str()))
            .collect();
        let descriptor = GraphDescriptor::build(info, &args);
        let names: Vec<&str> = info.data_sources.iter().map(|ds| ds.name.as_str()).collect();
        let unique_id = format!("rrd_{}_{}_{}", config.name, names.join("_"), info.step);
        debug!(graph = %config.name, file = %config.rrd_file, "set up graph");
        Ok(Self {
            config,
            unique_id,
            step: info.step,
            timerange,
            descriptor,
        })
    }

    /// Stable identifier: `rrd_{name}`, each data source name, then the step.
    ///
    /// Changes when the file behind the graph gains or loses a data source.
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Seconds between meaningful refreshes: the database step.
    pub fn frame_interval(&self) -> u64 {
        self.step
    }

    /// The descriptor behind the graph.
    pub fn descriptor(&self) -> &GraphDescriptor {
        &self.descriptor
    }

    /// The `[start, end)` range shown at `now`.
    pub fn window(&self, now: u64) -> (u64, u64) {
        (now.saturating_sub(self.timerange), now)
    }

    /// The rrdgraph command line for this graph.
    pub fn command_args(&self, width: u32, height: u32) -> Vec<String> {
        let mut cmd = vec![
            "--width".to_string(),
            width.to_string(),
            "--height".to_string(),
            height.to_string(),
            "--start".to_string(),
            format!("-{}", self.config.timerange),
        ];
        cmd.extend(self.config.options.iter().cloned());
        cmd.extend(self.descriptor.to_args());
        cmd
    }

    /// Renders the graph, or logs and returns `None` on failure.
    ///
    /// `width` and `height` override the configured size.
    pub fn image<R: GraphRenderer + ?Sized>(
        &self,
        renderer: &R,
        now: u64,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Option<Vec<u8>> {
        let width = width.unwrap_or(self.config.width);
        let height = height.unwrap_or(self.config.height);
        if let Err(e) = check_image_size("width", width).and_then(|()| check_image_size("height", height)) {
            error!(graph = %self.config.name, error = %e, "rejected image size");
            return None;
        }

        let primitives: Vec<PlotPrimitive> = self.descriptor.primitives().cloned().collect();
        match renderer.render(&primitives, width, height, self.window(now), &self.config.options) {
            Ok(image) => Some(image),
            Err(e) => {
                error!(graph = %self.config.name, error = %e, "failed to render graph");
                None
            }
        }
    }
}
