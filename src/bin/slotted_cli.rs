//! Simple CLI for poking at record and index files.
//!
//! Record files use a fixed `(id INT, name VARCHAR(255))` schema.
//!
//! Usage:
//!   slotted_cli <path> create
//!   slotted_cli <path> insert <id> <name>
//!   slotted_cli <path> read <page> <slot>
//!   slotted_cli <path> update <page> <slot> <id> <name>
//!   slotted_cli <path> delete <page> <slot>
//!   slotted_cli <path> scan [min_id]
//!   slotted_cli <path> compact
//!   slotted_cli <path> check
//!   slotted_cli <path> index_create <int|real|varchar>
//!   slotted_cli <path> index_insert <key> <page> <slot>
//!   slotted_cli <path> index_delete <key> <page> <slot>
//!   slotted_cli <path> index_scan [low] [high]
//!   slotted_cli <path> index_dump
//!   slotted_cli <path> index_bulk <count>

use slotted_storage::{
    AttrType, Attribute, CompOp, Config, IndexFile, IndexManager, Key, RecordFileManager, Rid,
    Tuple, Value,
};
use std::env;
use std::process::exit;

fn usage() -> ! {
    eprintln!("Usage: slotted_cli <path> <command> [args...]");
    eprintln!("Record commands:");
    eprintln!("  create                         - Create an empty record file");
    eprintln!("  insert <id> <name>             - Insert a record");
    eprintln!("  read <page> <slot>             - Read a record");
    eprintln!("  update <page> <slot> <id> <name> - Replace a record");
    eprintln!("  delete <page> <slot>           - Delete a record");
    eprintln!("  scan [min_id]                  - Scan records, optionally with id >= min_id");
    eprintln!("  compact                        - Shorten forwarding chains");
    eprintln!("  check                          - Validate every page");
    eprintln!("Index commands:");
    eprintln!("  index_create <int|real|varchar> - Create an empty index");
    eprintln!("  index_insert <key> <page> <slot> - Insert an entry");
    eprintln!("  index_delete <key> <page> <slot> - Delete an entry");
    eprintln!("  index_scan [low] [high]        - Scan entries with low <= key <= high");
    eprintln!("  index_dump                     - Print the tree as JSON");
    eprintln!("  index_bulk <count>             - Insert count test entries");
    exit(1);
}

fn or_exit<T>(result: slotted_storage::Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            exit(1);
        }
    }
}

fn arg<'a>(args: &'a [String], i: usize) -> &'a str {
    match args.get(i) {
        Some(s) => s.as_str(),
        None => usage(),
    }
}

fn parse<T: std::str::FromStr>(s: &str, what: &str) -> T {
    match s.parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("ERROR: Invalid {}: {}", what, s);
            exit(1);
        }
    }
}

fn rid(args: &[String], i: usize) -> Rid {
    Rid::new(parse(arg(args, i), "page"), parse(arg(args, i + 1), "slot"))
}

fn parse_key(index: &IndexFile, s: &str) -> Key {
    match index.key_type() {
        AttrType::Int => Key::Int(parse(s, "key")),
        AttrType::Real => Key::Real(parse(s, "key")),
        AttrType::VarChar => Key::from(s),
    }
}

fn print_row(rid: Rid, tuple: &Tuple) {
    let fields: Vec<String> = tuple.values().iter().map(|v| v.to_string()).collect();
    println!("{} -> {}", rid, fields.join(" | "));
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage();
    }

    let path = &args[1];
    let command = args[2].as_str();
    let schema = vec![Attribute::int("id"), Attribute::varchar("name", 255)];
    let config = Config::default();

    if let Some(command) = command.strip_prefix("index_") {
        let im = IndexManager::new(config);
        if command == "create" {
            let key_type = match arg(&args, 3) {
                "int" => AttrType::Int,
                "real" => AttrType::Real,
                "varchar" => AttrType::VarChar,
                other => {
                    eprintln!("ERROR: Unknown key type: {}", other);
                    exit(1);
                }
            };
            or_exit(im.create_file(path, key_type));
            println!("OK");
            return;
        }

        let mut index = or_exit(im.open_file(path));
        match command {
            "insert" => {
                let key = parse_key(&index, arg(&args, 3));
                or_exit(index.insert_entry(&key, rid(&args, 4)));
                println!("OK");
            }

            "delete" => {
                let key = parse_key(&index, arg(&args, 3));
                or_exit(index.delete_entry(&key, rid(&args, 4)));
                println!("DELETED");
            }

            "scan" => {
                let low = args.get(3).map(|s| parse_key(&index, s));
                let high = args.get(4).map(|s| parse_key(&index, s));
                let mut count = 0;
                for item in or_exit(index.scan(low.as_ref(), high.as_ref(), true, true)) {
                    let (rid, key) = or_exit(item);
                    println!("{} -> {}", key, rid);
                    count += 1;
                }
                println!("COUNT: {}", count);
            }

            "dump" => println!("{}", or_exit(index.dump_tree_json())),

            "bulk" => {
                let count: u32 = parse(arg(&args, 3), "count");
                let start = std::time::Instant::now();
                for i in 0..count {
                    let key = match index.key_type() {
                        AttrType::Int => Key::Int(i as i32),
                        AttrType::Real => Key::Real(i as f32),
                        AttrType::VarChar => Key::VarChar(format!("key_{:08}", i)),
                    };
                    or_exit(index.insert_entry(&key, Rid::new(1, i)));
                }
                let elapsed = start.elapsed();

                println!("INSERTED: {}", count);
                println!("ENTRIES: {}", or_exit(index.verify()));
                println!("TIME_MS: {}", elapsed.as_millis());
                println!("OPS_PER_SEC: {:.0}", count as f64 / elapsed.as_secs_f64());
            }

            _ => {
                eprintln!("Unknown command: index_{}", command);
                exit(1);
            }
        }

        let counters = index.counters();
        log::info!(
            "index io: {} reads, {} writes, {} appends",
            counters.reads,
            counters.writes,
            counters.appends
        );
        or_exit(im.close_file(index));
        return;
    }

    let rfm = RecordFileManager::new(config);
    if command == "create" {
        or_exit(rfm.create_file(path));
        println!("OK");
        return;
    }

    let mut file = or_exit(rfm.open_file(path));
    let row = |id: &str, name: &str| {
        Tuple::new(vec![Value::Int(parse(id, "id")), Value::VarChar(name.to_string())])
    };

    match command {
        "insert" => {
            let tuple = row(arg(&args, 3), arg(&args, 4));
            println!("{}", or_exit(file.insert_record(&schema, &tuple)));
        }

        "read" => {
            let rid = rid(&args, 3);
            print_row(rid, &or_exit(file.read_record(rid, &schema)));
        }

        "update" => {
            let tuple = row(arg(&args, 5), arg(&args, 6));
            or_exit(file.update_record(rid(&args, 3), &schema, &tuple));
            println!("OK");
        }

        "delete" => {
            or_exit(file.delete_record(rid(&args, 3)));
            println!("DELETED");
        }

        "scan" => {
            let min_id = args.get(3).map(|s| Value::Int(parse(s, "id")));
            let condition = min_id.as_ref().map(|v| ("id", CompOp::Ge, v));
            let mut count = 0;
            for item in or_exit(file.scan(&schema, condition, &["id", "name"])) {
                let (rid, tuple) = or_exit(item);
                print_row(rid, &tuple);
                count += 1;
            }
            println!("COUNT: {}", count);
        }

        "compact" => {
            let stats = or_exit(file.compact_forwards());
            println!("MOVED_HOME: {}", stats.moved_home);
            println!("COLLAPSED: {}", stats.collapsed);
        }

        "check" => {
            or_exit(file.validate());
            println!("PAGES: {}", file.page_count());
            println!("OK");
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            exit(1);
        }
    }

    or_exit(rfm.close_file(file));
}
