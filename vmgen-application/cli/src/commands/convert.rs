//! 单台虚拟机转换命令

use anyhow::Result;
use colored::Colorize;
use tracing::info;
use vmgen_orchestrator::ConversionJob;

use super::common;
use super::output;

pub struct ConvertArgs {
    pub vm: String,
    pub working_dir: Option<String>,
    pub no_backup: bool,
    pub accept_no_backup: bool,
    pub skip_registry: bool,
    pub format: String,
}

pub async fn handle(config_path: Option<&str>, args: ConvertArgs) -> Result<()> {
    let config = common::load_config(config_path, args.working_dir.as_deref())?;
    let converter = common::build_converter(&config);

    let mut job = ConversionJob::new(&args.vm, &config.working_dir).skip_registry(args.skip_registry);
    if args.no_backup {
        job = job.without_backup(args.accept_no_backup);
    }

    println!("{} 转换虚拟机: {}", "⏳".cyan(), args.vm.bold());
    info!("开始转换: {}", args.vm);

    let result = converter.convert(&job).await;

    match args.format.as_str() {
        "json" => output::print_json(&result)?,
        "yaml" => output::print_yaml(&result)?,
        _ => output::print_result(&result),
    }

    if !result.status.is_success() {
        std::process::exit(1);
    }

    Ok(())
}
