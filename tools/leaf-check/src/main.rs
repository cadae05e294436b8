//! # leaf-check
//!
//! Leaf 模板检查与渲染工具。
//!
//! ## 用法
//!
//! ```bash
//! # 检查目录下所有 .leaf 模板（语法、未解析的内联引用）
//! cargo run -p leaf-check -- check templates
//!
//! # 用 JSON 上下文渲染单个模板
//! cargo run -p leaf-check -- render templates/page.leaf --context data.json
//! cargo run -p leaf-check -- render page.leaf --config leaf.json --strict -vv
//! ```
//!
//! `#inline("name")` 在模板所在目录中查找 `name.leaf`，
//! `#inline("name", as: raw)` 查找名为 `name` 的文件。

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use leaf_kernel::{
    Diagnostic, DiagnosticLevel, DiagnosticReport, LeafAst, LeafConfiguration, LeafContext,
    LeafEngine, LeafEntities, analyze_template,
};
use tracing::{Level, debug, info};
use walkdir::WalkDir;

/// 模板文件扩展名
const TEMPLATE_EXTENSION: &str = "leaf";

#[derive(Parser)]
#[command(name = "leaf-check")]
#[command(about = "Leaf 模板检查与渲染工具")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 输出更多日志（-v: info, -vv: debug, -vvv: trace）
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// 配置文件（JSON）
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// 检查模板文件
    Check {
        /// 模板文件或目录（默认：templates）
        #[arg(default_value = "templates")]
        path: PathBuf,
    },

    /// 渲染单个模板到标准输出
    Render {
        /// 模板文件
        file: PathBuf,

        /// 上下文文件（JSON 对象）
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// 引用未设置的变量时报错
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = real_main(cli) {
        eprintln!("leaf-check error: {e:#}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn real_main(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => LeafConfiguration::load(path)
            .with_context(|| format!("无法加载配置: {}", path.display()))?,
        None => LeafConfiguration::default(),
    };

    match cli.command {
        Commands::Check { path } => check(&path, config),
        Commands::Render {
            file,
            context,
            strict,
        } => {
            if strict {
                config.missing_variable_throws = true;
            }
            let output = render(&file, context.as_deref(), config)?;
            print!("{output}");
            Ok(())
        }
    }
}

//=============================================================================
// 内联引用加载
//=============================================================================

/// 从模板目录加载 AST 需要的内联模板与原始文本并拼接
///
/// 每一轮只读取尚未登记的文件，没有新文件可读时结束。互相内联的模板
/// 因此只展开有限次，剩下的引用留给诊断报告。
fn resolve_from_disk(engine: &mut LeafEngine, ast: &mut LeafAst, dir: &Path) -> anyhow::Result<()> {
    loop {
        let loaded = load_missing(engine, ast, dir)?;
        if loaded == 0 {
            return Ok(());
        }
        let filled = engine.resolve(ast)?;
        debug!(template = %ast.name(), loaded, filled, "从磁盘拼接内联引用");
    }
}

/// 读取 AST 需要但引擎尚未登记的文件，返回新登记的数量
fn load_missing(engine: &mut LeafEngine, ast: &LeafAst, dir: &Path) -> anyhow::Result<usize> {
    let mut loaded = 0;

    for name in ast.required_templates() {
        if engine.contains_template(name) {
            continue;
        }
        let path = dir.join(format!("{name}.{TEMPLATE_EXTENSION}"));
        if !path.is_file() {
            debug!(template = %name, path = %path.display(), "内联模板不存在");
            continue;
        }
        let source = fs::read_to_string(&path)
            .with_context(|| format!("无法读取模板: {}", path.display()))?;
        engine.add_template(name.clone(), source);
        loaded += 1;
    }

    for name in ast.required_raws() {
        if engine.contains_raw(name) {
            continue;
        }
        let path = dir.join(name);
        if !path.is_file() {
            debug!(raw = %name, path = %path.display(), "原始文本不存在");
            continue;
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("无法读取文件: {}", path.display()))?;
        engine.add_raw(name.clone(), text);
        loaded += 1;
    }

    Ok(loaded)
}

/// 不带扩展名的模板名
fn template_name(file: &Path) -> String {
    file.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

//=============================================================================
// render 命令
//=============================================================================

fn render(file: &Path, context: Option<&Path>, config: LeafConfiguration) -> anyhow::Result<String> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("无法读取模板: {}", file.display()))?;
    let context = match context {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("无法读取上下文: {}", path.display()))?;
            LeafContext::from_json(&text)
                .with_context(|| format!("上下文格式无效: {}", path.display()))?
        }
        None => LeafContext::new(),
    };

    let dir = file.parent().unwrap_or(Path::new("."));
    let mut engine = LeafEngine::new(LeafEntities::core(), config);
    let name = template_name(file);

    let mut ast = engine
        .parse(&name, &source)
        .map_err(|e| anyhow::anyhow!(e.render_diagnostic(&source)))?;
    resolve_from_disk(&mut engine, &mut ast, dir)?;

    let missing = context.missing_keys(&ast);
    if !missing.is_empty() {
        info!(template = %name, missing = ?missing, "上下文缺少变量");
    }

    let output = engine.render(&ast, &context)?;
    Ok(output)
}

//=============================================================================
// check 命令
//=============================================================================

/// 检查结果
struct CheckResult {
    templates_checked: usize,
    diagnostics: DiagnosticReport,
}

fn check(path: &Path, config: LeafConfiguration) -> anyhow::Result<()> {
    let files = if path.is_file() {
        vec![path.to_path_buf()]
    } else if path.is_dir() {
        collect_template_files(path)
    } else {
        anyhow::bail!("路径不存在: {}", path.display());
    };

    if files.is_empty() {
        eprintln!("未找到模板文件（.{TEMPLATE_EXTENSION}）");
        return Ok(());
    }

    eprintln!("==> 检查 {} 个模板文件...\n", files.len());

    let mut result = CheckResult {
        templates_checked: 0,
        diagnostics: DiagnosticReport::new(),
    };
    for file in &files {
        check_template_file(file, &config, &mut result)?;
    }

    print_check_result(&result);

    if result.diagnostics.has_errors() {
        anyhow::bail!("模板检查发现错误");
    }
    Ok(())
}

fn collect_template_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == TEMPLATE_EXTENSION))
        .collect();
    files.sort();
    files
}

fn check_template_file(
    file: &Path,
    config: &LeafConfiguration,
    result: &mut CheckResult,
) -> anyhow::Result<()> {
    let id = file.display().to_string();
    result.templates_checked += 1;

    let source = match fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => {
            result
                .diagnostics
                .push(Diagnostic::load_failure(&id, format!("无法读取文件 - {e}")));
            return Ok(());
        }
    };

    // 每个文件使用独立的引擎
    let mut engine = LeafEngine::new(LeafEntities::core(), config.clone());
    let mut ast = match engine.parse(&template_name(file), &source) {
        Ok(ast) => ast,
        Err(e) => {
            result
                .diagnostics
                .push(Diagnostic::from_error(&id, &e, &source));
            return Ok(());
        }
    };

    let dir = file.parent().unwrap_or(Path::new("."));
    if let Err(e) = resolve_from_disk(&mut engine, &mut ast, dir) {
        result
            .diagnostics
            .push(Diagnostic::load_failure(&id, format!("内联模板无效: {e:#}")));
        return Ok(());
    }

    result.diagnostics.extend(analyze_template(&id, &ast));
    Ok(())
}

fn print_check_result(result: &CheckResult) {
    eprintln!("─────────────────────────────────────────────────────");
    eprintln!("检查完成: {} 个模板", result.templates_checked);
    eprintln!();

    for diag in &result.diagnostics.entries {
        eprintln!("{}", diag);
    }

    let error_count = result.diagnostics.count(DiagnosticLevel::Error);
    let warn_count = result.diagnostics.count(DiagnosticLevel::Warn);

    eprintln!();
    if error_count > 0 {
        eprintln!("❌ {} 个错误, {} 个警告", error_count, warn_count);
    } else if warn_count > 0 {
        eprintln!("⚠️  0 个错误, {} 个警告", warn_count);
    } else {
        eprintln!("✅ 检查通过，无错误");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_name_strips_extension() {
        assert_eq!(template_name(Path::new("templates/page.leaf")), "page");
        assert_eq!(template_name(Path::new("base")), "base");
    }

    #[test]
    fn test_resolve_from_disk() {
        let dir = std::env::temp_dir().join(format!("leaf-check-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("header.leaf"), "<h1>#(title)</h1>#inline(\"note.txt\", as: raw)").unwrap();
        fs::write(dir.join("note.txt"), "#(not parsed)").unwrap();

        let mut engine = LeafEngine::default();
        let mut ast = engine.parse("page", "#inline(\"header\")|#inline(\"footer\")").unwrap();
        resolve_from_disk(&mut engine, &mut ast, &dir).unwrap();

        assert!(ast.required_raws().is_empty());
        assert!(ast.required_templates().contains("footer"));
        let report = analyze_template("page", &ast);
        assert_eq!(report.missing_inlines().collect::<Vec<_>>(), ["footer"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_resolve_from_disk_stops_on_inline_cycle() {
        let dir = std::env::temp_dir().join(format!("leaf-check-cycle-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.leaf"), "B#inline(\"c\")").unwrap();
        fs::write(dir.join("c.leaf"), "C#inline(\"b\")").unwrap();

        let mut engine = LeafEngine::default();
        let mut ast = engine.parse("page", "#inline(\"b\")").unwrap();
        resolve_from_disk(&mut engine, &mut ast, &dir).unwrap();

        assert!(engine.contains_template("b"));
        assert!(engine.contains_template("c"));
        assert!(!ast.is_resolved());
        let report = analyze_template("page", &ast);
        assert_eq!(report.count(DiagnosticLevel::Warn), 1);

        let err = engine.render(&ast, &LeafContext::new()).unwrap_err();
        assert!(err.to_string().contains("尚未解析"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
