use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use clap_num::maybe_hex;
use exhume_body::{Body, BodySlice};
use exhume_mft::{
    LogSink, MFTRecord, Selector, SeekDisk, Table, TableBuilder, Volume, WarningSink,
};
use log::{debug, error, info};
use serde_json::{Value, json};
use std::ops::Range;

fn parse_range(s: &str) -> Result<Range<u64>, String> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("'{}' is not of the form start:end", s))?;
    let start = maybe_hex::<u64>(start)?;
    let end = maybe_hex::<u64>(end)?;
    Ok(start..end)
}

fn print_records(table: &Table, records: &[&MFTRecord], json_output: bool) {
    if json_output {
        let arr: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "status": r.status().to_string(),
                    "path": table.full_path(r.id),
                    "size": table.logical_size(r.id),
                })
            })
            .collect();
        match serde_json::to_string_pretty(&json!({ "records": arr })) {
            Ok(s) => println!("{}", s),
            Err(e) => error!("Error serializing records to JSON: {}", e),
        }
    } else {
        for r in records {
            println!(
                "{}\t{}\t{}\t{}",
                r.id,
                r.status(),
                table.logical_size(r.id).unwrap_or(0),
                table.full_path(r.id).unwrap_or_default()
            );
        }
    }
}

fn print_file(table: &Table, file_id: u64, json_output: bool) {
    let Some(file) = table.get(file_id) else {
        error!("Record {} is outside the MFT ({} records).", file_id, table.len());
        return;
    };
    let path = table.full_path(file_id).unwrap_or_default();
    if json_output {
        let mut v = file.to_json();
        v["path"] = json!(path);
        v["logical_size"] = json!(table.logical_size(file_id));
        v["physical_size"] = json!(table.physical_size(file_id));
        v["chain"] = json!(table.chain(file_id));
        println!("{}", v);
    } else {
        println!("Path: {}", path);
        println!("{}", file.to_string());
    }
}

fn run_queries(table: &Table, matches: &ArgMatches) {
    let json_output = matches.get_flag("json");

    if let Some(file_id) = matches.get_one::<u64>("file_id") {
        print_file(table, *file_id, json_output);
    }
    if matches.get_flag("path") {
        let all: Vec<&MFTRecord> = table.valid_records().collect();
        print_records(table, &all, json_output);
    }
    if let Some(name) = matches.get_one::<String>("name") {
        print_records(table, &table.find_by_name(name), json_output);
    }
    if let Some(ext) = matches.get_one::<String>("ext") {
        print_records(table, &table.find_by_extension(ext), json_output);
    }
}

fn main() {
    let matches = Command::new("exhume_mft")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Exhume the file records from an NTFS master file table.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(value_parser!(String))
                .required_unless_present("mft")
                .help("The path to the body to exhume."),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(value_parser!(String))
                .required(false)
                .help("The format of the file, either 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("The NTFS partition starts at address (decimal or hex)."),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_parser(maybe_hex::<u64>)
                .required_unless_present("mft")
                .help("The size of the NTFS partition in sectors (decimal or hex)."),
        )
        .arg(
            Arg::new("mft")
                .long("mft")
                .value_parser(value_parser!(String))
                .conflicts_with("body")
                .help("Parse an extracted $MFT file instead of a body."),
        )
        .arg(
            Arg::new("pbs")
                .long("pbs")
                .action(ArgAction::SetTrue)
                .requires("body")
                .help("Display the partition boot sector information."),
        )
        .arg(
            Arg::new("file_id")
                .long("file")
                .value_parser(maybe_hex::<u64>)
                .help("Display the metadata about a specific file record."),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .action(ArgAction::SetTrue)
                .help("List every record in use with its full path."),
        )
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .value_parser(value_parser!(String))
                .help("List the records with this file name (case insensitive)."),
        )
        .arg(
            Arg::new("ext")
                .short('e')
                .long("ext")
                .value_parser(value_parser!(String))
                .help("List the records with this file extension."),
        )
        .arg(
            Arg::new("range")
                .short('r')
                .long("range")
                .value_parser(parse_range)
                .help("Only parse the records start:end (decimal or hex)."),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .action(ArgAction::SetTrue)
                .requires("file_id")
                .requires("body")
                .help("Dump the file content to file_<ID>.bin (requires --file)"),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output the results in JSON format."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    // Initialize logger.
    let level_filter = match matches.get_one::<String>("log_level").map(String::as_str) {
        Some("error") => log::LevelFilter::Error,
        Some("warn") => log::LevelFilter::Warn,
        Some("debug") => log::LevelFilter::Debug,
        Some("trace") => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    let sink = LogSink;
    let range = matches.get_one::<Range<u64>>("range").cloned();
    let json_output = matches.get_flag("json");

    // An extracted $MFT: no disk, so only the resident metadata is available.
    if let Some(mft_path) = matches.get_one::<String>("mft") {
        let raw = match std::fs::read(mft_path) {
            Ok(r) => r,
            Err(e) => {
                error!("Cannot read '{}': {}", mft_path, e);
                return;
            }
        };
        let mut builder = TableBuilder::new(&sink);
        if let Some(r) = range {
            builder = builder.range(r);
        }
        match builder.build(&raw) {
            Ok(table) => run_queries(&table, &matches),
            Err(e) => error!("Cannot build the MFT table: {}", e),
        }
        return;
    }

    let Some(file_path) = matches.get_one::<String>("body") else {
        error!("Either --body or --mft is required.");
        return;
    };
    let auto = String::from("auto");
    let format = matches.get_one::<String>("format").unwrap_or(&auto);
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
    let Some(size) = matches.get_one::<u64>("size").copied() else {
        error!("--size is required with --body.");
        return;
    };

    let mut body = Body::new(file_path.to_owned(), format);
    debug!("Created Body from '{}'", file_path);

    let partition_size = size * body.get_sector_size() as u64;
    let mut slice = match BodySlice::new(&mut body, offset, partition_size) {
        Ok(sl) => sl,
        Err(e) => {
            error!("Could not create BodySlice: {}", e);
            return;
        }
    };

    let mut volume = match Volume::new(SeekDisk::new(&mut slice, partition_size)) {
        Ok(v) => v,
        Err(e) => {
            error!("Couldn't open NTFS: {}", e);
            return;
        }
    };

    if matches.get_flag("pbs") {
        if json_output {
            match serde_json::to_string_pretty(&volume.pbs.to_json()) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing PBS to JSON: {}", e),
            }
        } else {
            println!("{}", volume.pbs.to_string());
        }
    }

    let wants_table = matches.get_one::<u64>("file_id").is_some()
        || matches.get_flag("path")
        || matches.contains_id("name")
        || matches.contains_id("ext");
    if !wants_table {
        return;
    }

    let table = match volume.table(range, &sink) {
        Ok(t) => t,
        Err(e) => {
            error!("Cannot build the MFT table: {}", e);
            return;
        }
    };
    run_queries(&table, &matches);

    if matches.get_flag("dump") {
        if let Some(file_id) = matches.get_one::<u64>("file_id").copied() {
            dump_file(&mut volume, &table, file_id, &sink);
        }
    }
}

fn dump_file<D: exhume_mft::DiskReader>(
    volume: &mut Volume<D>,
    table: &Table,
    file_id: u64,
    sink: &dyn WarningSink,
) {
    match volume.read_content(table, file_id, Selector::DATA, sink) {
        Ok(data) => {
            let out_name = format!("file_{:X}.bin", file_id);
            if let Err(e) = std::fs::write(&out_name, &data) {
                error!("Cannot write dump: {}", e);
            } else {
                info!("Dumped {} bytes to {}", data.len(), out_name);
            }
        }
        Err(e) => error!("Dump failed: {}", e),
    }
}
