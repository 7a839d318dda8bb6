use clap::{App, AppSettings, Arg};
use dubbo::client::{BenchArgs, Client, InvokeArgs};
use dubbo::codec::{CodecStyle, Response};
use dubbo::logging;
use dubbo::sync;
use serde_json::Value;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "\nUsage:\n   \
     dubbo-ab -h<HOST> -p<PORT> -m<METHOD> -a<JSON_ARGUMENTS> \
     [-e<JSON_ATTACHMENT='{}'> -t<TIMEOUT_SEC=3> -c<CONCURRENCY> -n<REQUESTS> -v]\n\n\
     Example:\n   \
     dubbo-ab -h127.0.0.1 -p20880 -mcom.demo.DemoService.sayHello -a'[\"world\"]'\n";

/// Prints a red diagnostic plus the usage block and exits with 1.
fn die(msg: &str) -> ! {
    eprintln!("\x1b[1;31m{}\x1b[0m", msg);
    println!("{}", USAGE);
    process::exit(1);
}

/// Option values may arrive as `-h=value` or with stray whitespace; strip
/// both.
fn trim_opt(value: &str) -> &str {
    value
        .trim_start_matches(|c: char| c.is_whitespace() || c == '=')
        .trim_end()
}

fn main() {
    let matches = App::new("dubbo-ab")
        .about("Dubbo generic-invocation client and bench tool")
        .setting(AppSettings::DisableHelpFlags)
        .setting(AppSettings::DisableVersion)
        .arg(Arg::with_name("host").short("h").takes_value(true))
        .arg(Arg::with_name("port").short("p").takes_value(true))
        .arg(Arg::with_name("method").short("m").takes_value(true))
        .arg(Arg::with_name("args").short("a").takes_value(true))
        .arg(Arg::with_name("attach").short("e").takes_value(true))
        .arg(Arg::with_name("timeout").short("t").takes_value(true))
        .arg(Arg::with_name("concurrency").short("c").takes_value(true))
        .arg(Arg::with_name("requests").short("n").takes_value(true))
        .arg(Arg::with_name("verbose").short("v"))
        .get_matches_safe()
        .unwrap_or_else(|err| die(&err.message));

    let host = matches
        .value_of("host")
        .map(trim_opt)
        .unwrap_or_else(|| die("Missing Host -h=${host}"));
    let port = matches
        .value_of("port")
        .map(trim_opt)
        .unwrap_or_else(|| die("Missing Port -p=${port}"))
        .parse::<u16>()
        .unwrap_or_else(|_| die("Invalid Port -p=${port}"));

    let full_method = matches
        .value_of("method")
        .map(trim_opt)
        .unwrap_or_else(|| die("Missing Method -m=${service}.${method}"));
    let split = full_method
        .rfind('.')
        .unwrap_or_else(|| die(&format!("Invalid method {}", full_method)));
    let (service, method) = (&full_method[..split], &full_method[split + 1..]);
    if service.is_empty() || method.is_empty() {
        die(&format!("Invalid method {}", full_method));
    }

    let json_args = matches
        .value_of("args")
        .map(trim_opt)
        .unwrap_or_else(|| die("Missing Arguments -a'${jsonargs}'"));
    let json_attach = matches.value_of("attach").map(trim_opt).unwrap_or("{}");

    let timeout_sec = matches
        .value_of("timeout")
        .map(|t| {
            trim_opt(t)
                .parse::<i64>()
                .unwrap_or_else(|_| die("Timeout must be positive"))
        })
        .unwrap_or(3);
    if timeout_sec <= 0 {
        die("Timeout must be positive");
    }

    let pipe_n = parse_count(&matches, "concurrency");
    let req_n = parse_count(&matches, "requests");
    let verbose = matches.is_present("verbose");

    // Surface malformed JSON before anything touches the network.
    let parsed_args: Value = serde_json::from_str(json_args)
        .unwrap_or_else(|_| die(&format!("Invalid Arguments JSON Format : {}", json_args)));
    if !parsed_args.is_array() && !parsed_args.is_object() {
        die(&format!("Invalid Arguments JSON Format : {}", json_args));
    }

    let parsed_attach: Value = serde_json::from_str(json_attach)
        .unwrap_or_else(|_| die(&format!("Invalid Attach JSON Format as {}", json_attach)));
    if !parsed_attach.is_object() {
        die(&format!("Invalid Attach JSON Format as {}", json_attach));
    }

    let log = logging::init(if verbose {
        logging::Severity::Debug
    } else {
        logging::Severity::Info
    });

    let args = InvokeArgs {
        host: host.to_string(),
        port,
        service: service.to_string(),
        method: method.to_string(),
        json_args: json_args.to_string(),
        json_attach: json_attach.to_string(),
        timeout: Duration::from_secs(timeout_sec as u64),
        style: CodecStyle::Strings,
    };

    if pipe_n > 0 && req_n > 0 {
        run_bench(args, pipe_n, req_n, verbose, &log);
    } else {
        run_sync(args, &log);
    }
}

fn parse_count(matches: &clap::ArgMatches, name: &str) -> usize {
    matches
        .value_of(name)
        .map(|value| {
            trim_opt(value)
                .parse::<usize>()
                .unwrap_or_else(|_| die(&format!("Invalid {} count", name)))
        })
        .unwrap_or(0)
}

fn run_bench(args: InvokeArgs, pipe_n: usize, req_n: usize, verbose: bool, log: &logging::Logger) {
    let stop = Arc::new(AtomicBool::new(false));
    for &sig in &[signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&stop))
            .expect("Error installing signal handler");
    }

    let bench = BenchArgs {
        pipe_n,
        req_n,
        verbose,
    };

    let mut client = Client::new(args, bench, log).unwrap_or_else(|err| {
        eprintln!("\x1b[1;31m[ERROR] failed to start bench: {:?}\x1b[0m", err);
        process::exit(1);
    });

    match client.run(&stop) {
        Ok(summary) => summary.print(),
        Err(err) => {
            eprintln!("\x1b[1;31m[ERROR] bench aborted: {:?}\x1b[0m", err);
            process::exit(1);
        }
    }
}

fn run_sync(args: InvokeArgs, log: &logging::Logger) {
    match sync::invoke(&args, log) {
        Ok(res) => print_result(&res),
        Err(err) => {
            eprintln!("\x1b[1;31m[ERROR] invocation failed: {:?}\x1b[0m", err);
            process::exit(1);
        }
    }
}

fn print_result(res: &Response) {
    if res.is_event {
        println!("\x1b[1;32mEVT\x1b[0m");
    } else if res.ok {
        println!("\x1b[1;32m{}\x1b[0m", res.render_data());
    } else {
        println!("\x1b[1;31m{}\x1b[0m", res.desc);
        println!("\x1b[1;31m{}\x1b[0m", res.render_data());
    }
}
