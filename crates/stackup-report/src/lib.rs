use std::collections::HashMap;
use std::fmt::Write;
use std::io::{self, IsTerminal};

use console::Style;
use stackup_domain::{
    DeploymentPlan, DeploymentReport, EnvironmentConfig, ExportEntry, RegistryKey, UnitId,
    UnitReport, UnitState,
};

mod error;
mod options;

pub use error::ReportError;
pub use options::{ColorChoice, OutputFormat, RenderOptions};

/// Render a deployment plan in the requested output format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_plan(
    plan: &DeploymentPlan,
    format: OutputFormat,
    options: &RenderOptions,
) -> std::result::Result<String, ReportError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(plan)
            .map_err(|source| ReportError::JsonSerialize { source }),
        OutputFormat::Text => Ok(render_plan_text(plan, options)),
    }
}

/// Render a deployment report in the requested output format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_deployment(
    report: &DeploymentReport,
    format: OutputFormat,
    options: &RenderOptions,
) -> std::result::Result<String, ReportError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|source| ReportError::JsonSerialize { source }),
        OutputFormat::Text => Ok(render_deployment_text(report, options)),
    }
}

// ---------------------------------------------------------------------------
// Plan text
// ---------------------------------------------------------------------------

fn render_plan_text(plan: &DeploymentPlan, options: &RenderOptions) -> String {
    let mut output = String::new();
    let style = TextStyle::new(options.color);

    append_header(&mut output, "plan", &plan.config, plan.target.as_ref(), &style);
    append_config(&mut output, &plan.config, &style);
    append_warnings(&mut output, &plan.warnings, &style);

    if plan.units.is_empty() {
        let _ = writeln!(output, "  Nothing to do.");
        return output;
    }

    let _ = writeln!(output);
    for (position, unit) in plan.units.iter().enumerate() {
        let label = TextStyle::pad_label(&style.add_label("apply"));
        let _ = write!(
            output,
            "  {} {label}{}",
            style.add_symbol("+"),
            style.primary_text(unit.id.as_str())
        );
        if !unit.dependencies.is_empty() {
            let _ = write!(
                output,
                " {}",
                style.dim(&format!("after {}", join_ids(&unit.dependencies)))
            );
        }
        let _ = writeln!(output);

        if options.verbose {
            let _ = writeln!(output, "    {}", style.dim(&format!("#{}", position + 1)));
            for key in &unit.outputs {
                let _ = writeln!(output, "    {}", style.dim(&format!("publishes {key}")));
            }
        }
    }

    let _ = writeln!(output);
    let outputs: usize = plan.units.iter().map(|unit| unit.outputs.len()).sum();
    let _ = writeln!(
        output,
        "{} {}, {}",
        style.tally_label("Plan:"),
        style.add_label(&plural(plan.units.len(), "unit to apply", "units to apply")),
        style.dim(&plural(outputs, "output", "outputs"))
    );

    output
}

// ---------------------------------------------------------------------------
// Deployment text
// ---------------------------------------------------------------------------

fn render_deployment_text(report: &DeploymentReport, options: &RenderOptions) -> String {
    let mut output = String::new();
    let style = TextStyle::new(options.color);
    let exports: HashMap<&RegistryKey, &ExportEntry> = report
        .exports
        .iter()
        .map(|entry| (&entry.key, entry))
        .collect();

    append_header(
        &mut output,
        "deploy",
        &report.config,
        report.target.as_ref(),
        &style,
    );
    if options.verbose {
        append_config(&mut output, &report.config, &style);
    }

    let mut warnings = report.warnings.clone();
    if report.cancelled {
        warnings.push("deployment cancelled; units not yet started remain pending".to_string());
    }
    append_warnings(&mut output, &warnings, &style);

    if report.units.is_empty() {
        let _ = writeln!(output, "  Nothing to do.");
        return output;
    }

    let _ = writeln!(output);
    for unit in &report.units {
        append_unit_line(&mut output, unit, &exports, options, &style);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "{}", format_tally(report, &style));

    output
}

// ---------------------------------------------------------------------------
// Line renderers
// ---------------------------------------------------------------------------

fn append_header(
    output: &mut String,
    command: &str,
    config: &EnvironmentConfig,
    target: Option<&UnitId>,
    style: &TextStyle,
) {
    let _ = write!(
        output,
        "{} {}",
        style.header_command(command),
        style.header_target(&format!("{}/{}", config.environment, config.region))
    );
    if let Some(target) = target {
        let _ = write!(output, " {}", style.dim(&format!("(target {target})")));
    }
    let _ = writeln!(output);
}

fn append_config(output: &mut String, config: &EnvironmentConfig, style: &TextStyle) {
    let mut rows = vec![
        ("profile", config.profile.clone()),
        ("platform", config.platform_version.clone()),
        ("nodes", config.node_count.to_string()),
    ];
    if let Some(instance_class) = &config.instance_class {
        rows.push(("instance", instance_class.clone()));
    }
    if let Some(cidr) = &config.vpc_cidr {
        rows.push(("vpc", cidr.to_string()));
    }
    if let Some(account) = &config.account {
        rows.push(("account", account.clone()));
    }

    let _ = writeln!(output);
    for (name, value) in rows {
        let _ = writeln!(
            output,
            "  {}{}",
            TextStyle::pad_label(&style.dim(name)),
            style.primary_text(&value)
        );
    }
}

fn append_unit_line(
    output: &mut String,
    unit: &UnitReport,
    exports: &HashMap<&RegistryKey, &ExportEntry>,
    options: &RenderOptions,
    style: &TextStyle,
) {
    let (symbol, label) = state_symbol_and_label(unit, style);
    let _ = write!(
        output,
        "  {symbol} {label}{}",
        style.primary_text(unit.unit.as_str())
    );
    match unit.state {
        UnitState::Published if !unit.published.is_empty() => {
            let _ = write!(
                output,
                " {}",
                style.dim(&plural(unit.published.len(), "output", "outputs"))
            );
        }
        UnitState::Skipped => {
            if let Some(blocked_by) = &unit.blocked_by {
                let _ = write!(output, " {}", style.dim(&format!("blocked by {blocked_by}")));
            }
        }
        _ => {}
    }
    let _ = writeln!(output);

    if let Some(failure) = &unit.failure {
        let _ = writeln!(
            output,
            "                     {}",
            style.error_detail(&format!("{}: {}", failure.kind.as_str(), failure.message))
        );
    }

    for key in &unit.published {
        if options.verbose {
            let value = exports
                .get(key)
                .map_or_else(String::new, |entry| entry.value.to_string());
            let _ = writeln!(output, "    {}", style.dim(&format!("{key} = {value}")));
        } else {
            let _ = writeln!(output, "    {}", style.dim(key.as_str()));
        }
    }

    if options.verbose {
        if unit.state == UnitState::Published || unit.state == UnitState::Failed {
            let _ = writeln!(
                output,
                "    {}",
                style.dim(&format!("took {}ms", unit.elapsed_ms))
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

fn append_warnings(output: &mut String, warnings: &[String], style: &TextStyle) {
    if warnings.is_empty() {
        return;
    }
    let _ = writeln!(output);
    for warning in warnings {
        let _ = writeln!(output, "  {} {warning}", style.warn_prefix("warn:"));
    }
}

// ---------------------------------------------------------------------------
// Symbol + Label helpers
// ---------------------------------------------------------------------------

fn state_symbol_and_label(unit: &UnitReport, style: &TextStyle) -> (String, String) {
    match unit.state {
        UnitState::Published if unit.imported => (
            style.noop_symbol("="),
            TextStyle::pad_label(&style.noop_label("imported")),
        ),
        UnitState::Published => (
            style.add_symbol("+"),
            TextStyle::pad_label(&style.add_label("published")),
        ),
        UnitState::Failed => (
            style.error_op_symbol("!"),
            TextStyle::pad_label(&style.error_op_label("failed")),
        ),
        UnitState::Skipped => (
            style.skip_symbol("-"),
            TextStyle::pad_label(&style.skip_label("skipped")),
        ),
        UnitState::Pending | UnitState::Applying => (
            style.noop_symbol("."),
            TextStyle::pad_label(&style.noop_label(unit.state.as_str())),
        ),
    }
}

fn format_tally(report: &DeploymentReport, style: &TextStyle) -> String {
    let counts = report.counts();
    let mut parts = vec![
        style.add_label(&format!("{} published", counts.published)),
        if counts.failed > 0 {
            style.error_op_label(&format!("{} failed", counts.failed))
        } else {
            style.dim(&format!("{} failed", counts.failed))
        },
        if counts.skipped > 0 {
            style.skip_label(&format!("{} skipped", counts.skipped))
        } else {
            style.dim(&format!("{} skipped", counts.skipped))
        },
    ];
    if counts.pending > 0 {
        parts.push(style.dim(&format!("{} pending", counts.pending)));
    }
    format!("{} {}", style.tally_label("Deployed:"), parts.join(", "))
}

fn join_ids(ids: &[UnitId]) -> String {
    ids.iter()
        .map(UnitId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn plural(count: usize, singular: &str, plural: &str) -> String {
    format!("{count} {}", if count == 1 { singular } else { plural })
}

// ---------------------------------------------------------------------------
// TextStyle
// ---------------------------------------------------------------------------

const LABEL_WIDTH: usize = 16;

#[derive(Debug, Clone)]
struct TextStyle {
    color_enabled: bool,
    // Symbols
    add_sym_style: Style,
    skip_sym_style: Style,
    error_sym_style: Style,
    noop_sym_style: Style,
    // Labels
    add_label_style: Style,
    skip_label_style: Style,
    error_label_style: Style,
    noop_label_style: Style,
    // Content
    primary_style: Style,
    dim_style: Style,
    error_detail_style: Style,
    // Header
    header_cmd_style: Style,
    header_target_style: Style,
    // Prefixes
    warn_prefix_style: Style,
    // Tally
    tally_label_style: Style,
}

impl TextStyle {
    fn new(choice: ColorChoice) -> Self {
        let enabled = should_color(choice);
        Self {
            color_enabled: enabled,
            add_sym_style: Style::new().green().bold(),
            skip_sym_style: Style::new().yellow().bold(),
            error_sym_style: Style::new().red().bold(),
            noop_sym_style: Style::new().dim(),
            add_label_style: Style::new().green(),
            skip_label_style: Style::new().yellow(),
            error_label_style: Style::new().red(),
            noop_label_style: Style::new().dim(),
            primary_style: Style::new().white(),
            dim_style: Style::new().dim(),
            error_detail_style: Style::new().red(),
            header_cmd_style: Style::new().white().bold(),
            header_target_style: Style::new().dim(),
            warn_prefix_style: Style::new().yellow().bold(),
            tally_label_style: Style::new().white().bold(),
        }
    }

    fn paint<T: std::fmt::Display>(&self, style: &Style, text: T) -> String {
        if self.color_enabled {
            style.clone().force_styling(true).apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn pad_label(painted: &str) -> String {
        // Visible width, ANSI codes excluded.
        let visible_len = console::measure_text_width(painted);
        if visible_len < LABEL_WIDTH {
            format!("{painted}{}", " ".repeat(LABEL_WIDTH - visible_len))
        } else {
            format!("{painted} ")
        }
    }

    // Symbols
    fn add_symbol(&self, s: &str) -> String {
        self.paint(&self.add_sym_style, s)
    }
    fn skip_symbol(&self, s: &str) -> String {
        self.paint(&self.skip_sym_style, s)
    }
    fn error_op_symbol(&self, s: &str) -> String {
        self.paint(&self.error_sym_style, s)
    }
    fn noop_symbol(&self, s: &str) -> String {
        self.paint(&self.noop_sym_style, s)
    }

    // Labels
    fn add_label(&self, s: &str) -> String {
        self.paint(&self.add_label_style, s)
    }
    fn skip_label(&self, s: &str) -> String {
        self.paint(&self.skip_label_style, s)
    }
    fn error_op_label(&self, s: &str) -> String {
        self.paint(&self.error_label_style, s)
    }
    fn noop_label(&self, s: &str) -> String {
        self.paint(&self.noop_label_style, s)
    }

    // Content
    fn primary_text(&self, s: &str) -> String {
        self.paint(&self.primary_style, s)
    }
    fn dim(&self, s: &str) -> String {
        self.paint(&self.dim_style, s)
    }
    fn error_detail(&self, s: &str) -> String {
        self.paint(&self.error_detail_style, s)
    }

    // Header
    fn header_command(&self, s: &str) -> String {
        self.paint(&self.header_cmd_style, s)
    }
    fn header_target(&self, s: &str) -> String {
        self.paint(&self.header_target_style, s)
    }

    // Prefixes
    fn warn_prefix(&self, s: &str) -> String {
        self.paint(&self.warn_prefix_style, s)
    }

    // Tally
    fn tally_label(&self, s: &str) -> String {
        self.paint(&self.tally_label_style, s)
    }
}

fn should_color(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stdout().is_terminal(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
