use clap::{Arg, Command};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use senderstats::config::Config;
use senderstats::ingest;
use senderstats::pipeline::Pipeline;
use senderstats::processors::{
    AlignmentProcessor, DateTally, HeaderFromProcessor, MessageIdProcessor, ReturnPathProcessor,
    SenderProcessor,
};
use senderstats::report::{write_reports, ReportBuilder, ReportOptions, ReportTable};
use senderstats::scoring::ScoringEngine;
use senderstats::suffix_trie::SuffixTrie;

fn main() {
    let matches = Command::new("senderstats")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sender behavior statistics and automation classification for mail logs")
        .arg(
            Arg::new("input")
                .value_name("FILE")
                .help("Input mail log CSV files")
                .num_args(1..)
                .required_unless_present("generate-config"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file and exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PREFIX")
                .help("Output report prefix (one CSV per report dimension)")
                .default_value("senderstats"),
        )
        .arg(
            Arg::new("suffix-rules")
                .long("suffix-rules")
                .value_name("FILE")
                .help("Public suffix rule file (text rules or pre-built .json trie)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("decode-srs")
                .long("decode-srs")
                .help("Reverse SRS rewriting on sender addresses")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("remove-prvs")
                .long("remove-prvs")
                .help("Strip PRVS bounce-verification tags from sender addresses")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("normalize-bounces")
                .long("normalize-bounces")
                .help("Collapse tagged bounce addresses to their bare local part")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("normalize-entropy")
                .long("normalize-entropy")
                .help("Merge machine-generated random senders under one placeholder")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-display")
                .long("no-display")
                .help("Reduce header From values to the bare address")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-empty-hfrom")
                .long("no-empty-hfrom")
                .help("Use the envelope sender when the header From is empty")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("gen-hfrom")
                .long("gen-hfrom")
                .help("Generate the header From report")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("gen-rpath")
                .long("gen-rpath")
                .help("Generate the return path report")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("gen-alignment")
                .long("gen-alignment")
                .help("Generate the sender/header-From alignment report")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("gen-msgid")
                .long("gen-msgid")
                .help("Generate the Message-ID infrastructure report")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("expand-recipients")
                .long("expand-recipients")
                .help("Weight totals by recipient count instead of per message")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("sample-subject")
                .long("sample-subject")
                .help("Include sample subjects per sender in the reports")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("probability")
                .long("probability")
                .help("Include automation probability scoring and labels")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("exclude-domain")
                .long("exclude-domain")
                .value_name("DOMAIN")
                .help("Exclude senders from this domain (repeatable)")
                .action(clap::ArgAction::Append),
        )
        .arg(
            Arg::new("exclude-sender")
                .long("exclude-sender")
                .value_name("ADDRESS")
                .help("Exclude this sender address (repeatable)")
                .action(clap::ArgAction::Append),
        )
        .arg(
            Arg::new("restrict-domain")
                .long("restrict-domain")
                .value_name("DOMAIN")
                .help("Only keep senders from this domain (repeatable)")
                .action(clap::ArgAction::Append),
        )
        .arg(
            Arg::new("top-n")
                .long("top-n")
                .value_name("N")
                .help("Top subject templates considered per sender")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        let config = Config::default();
        if let Err(e) = config.to_file(path) {
            eprintln!("Error generating configuration: {e:#}");
            process::exit(1);
        }
        println!("Wrote default configuration to {path}");
        return;
    }

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading configuration: {e:#}");
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    apply_cli_overrides(&mut config, &matches);

    let trie = match load_suffix_trie(&config) {
        Ok(trie) => Arc::new(trie),
        Err(e) => {
            eprintln!("Error loading suffix rules: {e:#}");
            process::exit(1);
        }
    };

    let inputs: Vec<PathBuf> = matches
        .get_many::<String>("input")
        .map(|vals| vals.map(PathBuf::from).collect())
        .unwrap_or_default();
    let output_prefix = PathBuf::from(matches.get_one::<String>("output").unwrap());

    match run(&config, trie, &inputs, &output_prefix) {
        Ok(written) => {
            for path in written {
                log::info!("wrote {}", path.display());
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn apply_cli_overrides(config: &mut Config, matches: &clap::ArgMatches) {
    let p = &mut config.processing;
    p.decode_srs |= matches.get_flag("decode-srs");
    p.remove_prvs |= matches.get_flag("remove-prvs");
    p.normalize_bounces |= matches.get_flag("normalize-bounces");
    p.normalize_entropy |= matches.get_flag("normalize-entropy");
    p.strip_display_names |= matches.get_flag("no-display");
    p.backfill_empty_hfrom |= matches.get_flag("no-empty-hfrom");
    p.gen_hfrom |= matches.get_flag("gen-hfrom");
    p.gen_rpath |= matches.get_flag("gen-rpath");
    p.gen_alignment |= matches.get_flag("gen-alignment");
    p.gen_msgid |= matches.get_flag("gen-msgid");
    p.expand_recipients |= matches.get_flag("expand-recipients");

    if let Some(domains) = matches.get_many::<String>("exclude-domain") {
        p.exclude_domains.extend(domains.cloned());
    }
    if let Some(senders) = matches.get_many::<String>("exclude-sender") {
        p.exclude_senders.extend(senders.cloned());
    }
    if let Some(domains) = matches.get_many::<String>("restrict-domain") {
        p.restrict_domains.extend(domains.cloned());
    }

    config.report.sample_subjects |= matches.get_flag("sample-subject");
    config.report.with_probability |= matches.get_flag("probability");
    if let Some(top_n) = matches.get_one::<String>("top-n") {
        match top_n.parse::<usize>() {
            Ok(n) if n > 0 => config.report.top_n = n,
            _ => log::warn!("ignoring invalid --top-n value {top_n:?}"),
        }
    }

    if let Some(path) = matches.get_one::<String>("suffix-rules") {
        config.suffix_rules_path = Some(path.clone());
    }
}

fn load_suffix_trie(config: &Config) -> anyhow::Result<SuffixTrie> {
    match &config.suffix_rules_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("cannot read suffix rule file {path}: {e}"))?;
            if path.ends_with(".json") {
                SuffixTrie::load(&content)
            } else {
                SuffixTrie::from_rules(content.lines())
            }
        }
        None => Ok(SuffixTrie::builtin()),
    }
}

fn run(
    config: &Config,
    trie: Arc<SuffixTrie>,
    inputs: &[PathBuf],
    output_prefix: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let p = &config.processing;
    let pipeline = Pipeline::from_config(config, trie);

    let topk = p.topk_subjects;
    let expand = p.expand_recipients;
    let mut sender = SenderProcessor::new(topk, expand);
    let mut hfrom = p.gen_hfrom.then(|| HeaderFromProcessor::new(topk, expand));
    let mut rpath = p.gen_rpath.then(|| ReturnPathProcessor::new(topk, expand));
    let mut alignment = p.gen_alignment.then(|| AlignmentProcessor::new(topk, expand));
    let mut msgid = p.gen_msgid.then(|| MessageIdProcessor::new(topk, expand));
    let mut tally = DateTally::new();

    let mut total_rows = 0u64;
    let mut kept_rows = 0u64;

    for (idx, path) in inputs.iter().enumerate() {
        log::info!(
            "processing {} ({} of {})",
            path.display(),
            idx + 1,
            inputs.len()
        );
        total_rows += ingest::read_file(path, &config.fields, |record| {
            if let Some(record) = pipeline.process(record) {
                kept_rows += 1;
                tally.observe(&record);
                sender.observe(&record);
                if let Some(proc) = hfrom.as_mut() {
                    proc.observe(&record);
                }
                if let Some(proc) = rpath.as_mut() {
                    proc.observe(&record);
                }
                if let Some(proc) = alignment.as_mut() {
                    proc.observe(&record);
                }
                if let Some(proc) = msgid.as_mut() {
                    proc.observe(&record);
                }
            }
        })?;
    }

    let days = tally.days();
    log::info!(
        "{kept_rows} of {total_rows} rows kept across {days} observed days, {} senders",
        sender.key_count()
    );

    let builder = ReportBuilder::new(
        ReportOptions {
            days,
            top_n: config.report.top_n,
            sample_subjects: config.report.sample_subjects,
            with_probability: config.report.with_probability,
            debug: config.report.debug,
        },
        ScoringEngine::new(config.scoring.clone(), config.report.top_n),
    );

    let mut tables: Vec<ReportTable> = vec![sender.table(&builder)];
    if let Some(proc) = &hfrom {
        tables.push(proc.table(&builder));
    }
    if let Some(proc) = &rpath {
        tables.push(proc.table(&builder));
    }
    if let Some(proc) = &alignment {
        tables.push(proc.table(&builder));
    }
    if let Some(proc) = &msgid {
        tables.push(proc.table(&builder));
    }

    write_reports(&tables, output_prefix)
}
