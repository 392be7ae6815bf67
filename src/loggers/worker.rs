use crate::loggers::core::{LogRecord, SysInfo};
use sysinfo::System;
use tokio::sync::mpsc;

pub struct LogWorker {
    receiver: mpsc::Receiver<LogRecord>,
    sys: Option<System>,
}

impl LogWorker {
    pub fn new(receiver: mpsc::Receiver<LogRecord>, enrich_sys: bool) -> Self {
        // sysinfo 0.30: System::new_all() includes CPU/Memory initialization
        let sys = enrich_sys.then(|| {
            let mut sys = System::new_all();
            sys.refresh_all();
            sys
        });
        Self { receiver, sys }
    }

    pub async fn run(mut self) {
        while let Some(mut record) = self.receiver.recv().await {
            if let Some(sys) = self.sys.as_mut() {
                sys.refresh_cpu();
                sys.refresh_memory();

                record.sys = Some(SysInfo {
                    cpu_usage: sys.global_cpu_info().cpu_usage(),
                    mem_used_kb: sys.used_memory() / 1024,
                    load_avg: vec![
                        System::load_average().one,
                        System::load_average().five,
                        System::load_average().fifteen,
                    ],
                    uptime_secs: System::uptime(),
                });
            }

            if let Ok(json) = serde_json::to_string(&record) {
                println!("{}", json);
            }
        }
    }
}
