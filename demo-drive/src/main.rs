use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use streamdrive::storage::{
    CompletedRequest, Completion, DriveMount, ParentLink, ReadRequest, RequestOutput, RequestPath,
    StorageDrive, StorageDriveConfig,
};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub struct DemoDriveArgs {
    /// Drive configuration json. Defaults are used if omitted.
    #[structopt(name = "config", long, parse(from_os_str))]
    pub config: Option<PathBuf>,
    /// Directory to stream, mounted as drive "data"
    #[structopt(name = "dir", long, parse(from_os_str))]
    pub dir: Option<PathBuf>,
    #[structopt(name = "trace", long)]
    pub trace: bool,
}

const DATA_DRIVE: &str = "data";

fn build_config(args: &DemoDriveArgs) -> Result<StorageDriveConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => StorageDriveConfig::read_from_path(path)?,
        None => StorageDriveConfig::new(Vec::default()),
    };

    let existing = config.drives.iter().position(|d| d.name == DATA_DRIVE);
    match (&args.dir, existing) {
        (Some(dir), Some(index)) => config.drives[index].path = dir.clone(),
        (Some(dir), None) => config.drives.push(DriveMount {
            name: DATA_DRIVE.to_string(),
            path: dir.clone(),
        }),
        (None, Some(_)) => {}
        (None, None) => config.drives.push(DriveMount {
            name: DATA_DRIVE.to_string(),
            path: std::env::current_dir()?,
        }),
    }

    Ok(config)
}

fn list_files(dir: &Path) -> Result<Vec<(String, u64)>, Box<dyn Error>> {
    let mut files = Vec::default();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        if let Some(name) = entry.file_name().to_str() {
            files.push((name.to_string(), metadata.len()));
        }
    }

    files.sort();
    Ok(files)
}

fn describe(completed: &CompletedRequest) -> String {
    match &completed.completion {
        Completion::Success(RequestOutput::Read { bytes_read }) => format!("read {} bytes", bytes_read),
        Completion::Success(RequestOutput::Exists(exists)) => format!("exists: {}", exists),
        Completion::Success(RequestOutput::MetaData(size)) => format!("size: {:?}", size),
        Completion::Success(output) => format!("{:?}", output),
        Completion::Failure(kind) => format!("failed: {}", kind),
        Completion::Canceled => "canceled".to_string(),
    }
}

fn run(args: &DemoDriveArgs) -> Result<(), Box<dyn Error>> {
    let config = build_config(args)?;
    let data_dir = config
        .drives
        .iter()
        .find(|d| d.name == DATA_DRIVE)
        .map(|d| d.path.clone())
        .ok_or("No data drive configured")?;
    let files = list_files(&data_dir)?;
    log::info!("Streaming {} files from {:?}", files.len(), data_dir);

    let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
    let mut drive = StorageDrive::new_threaded(config, completion_tx)?;
    let sender = drive.request_sender();

    let mut names = Vec::default();
    for (index, (name, size)) in files.iter().enumerate() {
        let parent = ParentLink(index as u64);
        let path = RequestPath::drive(DATA_DRIVE, name.as_str());
        sender.exists(parent, path.clone()).map_err(|_| "drive stopped")?;
        sender.metadata(parent, path.clone()).map_err(|_| "drive stopped")?;
        sender
            .read(parent, ReadRequest::new(path, 0, *size))
            .map_err(|_| "drive stopped")?;
        names.push(name.as_str());
    }

    let expected = files.len() * 3;
    let mut received = 0;
    let start = Instant::now();
    while received < expected {
        let did_work = drive.execute_requests();
        for completed in completion_rx.try_iter() {
            received += 1;
            log::debug!(
                "{} {:?}: {}",
                names[completed.parent.0 as usize],
                completed.id,
                describe(&completed)
            );
        }

        profiling::finish_frame!();
        if !did_work {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    println!(
        "Completed {} requests for {} files in {:?}",
        received,
        files.len(),
        start.elapsed()
    );

    let mut statistics = Vec::default();
    drive.collect_statistics(&mut statistics);
    for statistic in statistics {
        println!("  {}: {:.3}", statistic.name, statistic.value);
    }

    Ok(())
}

fn main() {
    let args = DemoDriveArgs::from_args();

    // Setup logging
    env_logger::Builder::default()
        .write_style(env_logger::WriteStyle::Always)
        .filter_level(if args.trace {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        })
        .init();

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
