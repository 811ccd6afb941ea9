//! 进程内的假评估主机：实现逐行 JSON 协议，把 CSV 提交当作单工作表文档

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assignment_evaluator::models::{CellRange, CellValue};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// 唯一的工作表名
pub const SHEET: &str = "Foglio1";

/// 故障注入
#[derive(Debug, Clone, Default)]
pub struct HostBehavior {
    /// 文件名包含该片段的文档，加载时先等待一段时间再应答
    pub stall_load: Option<(String, Duration)>,
    /// 已成功加载这么多个文档后，下一次加载直接断开连接
    pub drop_after_loads: Option<usize>,
}

#[derive(Debug, Default)]
pub struct HostStats {
    pub loads: Vec<PathBuf>,
    pub open_documents: usize,
    pub max_open_documents: usize,
    pub connections: usize,
}

#[derive(Default)]
struct HostState {
    stats: HostStats,
    documents: HashMap<String, Vec<Vec<CellValue>>>,
    next_id: usize,
}

pub struct FakeHostServer {
    pub addr: String,
    pub port: u16,
    state: Arc<Mutex<HostState>>,
}

impl FakeHostServer {
    pub async fn start() -> Self {
        Self::start_with(HostBehavior::default()).await
    }

    pub async fn start_with(behavior: HostBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(HostState::default()));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.lock().unwrap().stats.connections += 1;
                tokio::spawn(serve(stream, shared.clone(), behavior.clone()));
            }
        });

        Self {
            addr: local.to_string(),
            port: local.port(),
            state,
        }
    }

    pub fn loads(&self) -> usize {
        self.state.lock().unwrap().stats.loads.len()
    }

    pub fn open_documents(&self) -> usize {
        self.state.lock().unwrap().stats.open_documents
    }

    pub fn max_open_documents(&self) -> usize {
        self.state.lock().unwrap().stats.max_open_documents
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().stats.connections
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<HostState>>, behavior: HostBehavior) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    // 本连接打开的文档，断开时一并释放
    let mut owned = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        let request = match serde_json::from_str::<Value>(&line) {
            Ok(request) => request,
            Err(e) => {
                let mut out = failure("bad_request", &e.to_string()).to_string();
                out.push('\n');
                let _ = write_half.write_all(out.as_bytes()).await;
                continue;
            }
        };

        if request["op"] == "load" {
            let path = request["path"].as_str().unwrap_or_default();
            if let Some((pattern, delay)) = &behavior.stall_load {
                if path.contains(pattern.as_str()) {
                    tokio::time::sleep(*delay).await;
                }
            }
            if let Some(limit) = behavior.drop_after_loads {
                if state.lock().unwrap().stats.loads.len() >= limit {
                    break;
                }
            }
        }

        let response = handle(&request, &state, &mut owned);
        let mut out = response.to_string();
        out.push('\n');
        if write_half.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }

    let mut state = state.lock().unwrap();
    for id in owned {
        if state.documents.remove(&id).is_some() {
            state.stats.open_documents -= 1;
        }
    }
}

fn handle(request: &Value, state: &Mutex<HostState>, owned: &mut Vec<String>) -> Value {
    let mut state = state.lock().unwrap();
    match request["op"].as_str() {
        Some("load") => {
            let path = PathBuf::from(request["path"].as_str().unwrap_or_default());
            let grid = match read_csv(&path) {
                Ok(grid) => grid,
                Err(e) => return failure("load_failed", &e),
            };
            state.next_id += 1;
            let id = format!("doc-{}", state.next_id);
            state.documents.insert(id.clone(), grid);
            owned.push(id.clone());
            state.stats.loads.push(path);
            state.stats.open_documents += 1;
            state.stats.max_open_documents = state
                .stats
                .max_open_documents
                .max(state.stats.open_documents);
            json!({"ok": true, "document": id})
        }
        Some("read") => {
            let id = request["document"].as_str().unwrap_or_default();
            let Some(grid) = state.documents.get(id) else {
                return failure("no_such_document", id);
            };
            if let Some(sheet) = request["sheet"].as_str() {
                if sheet != SHEET {
                    return failure("no_such_sheet", sheet);
                }
            }
            let range: CellRange = match request["range"].as_str().unwrap_or_default().parse() {
                Ok(range) => range,
                Err(e) => return failure("invalid_range", &e.to_string()),
            };
            let rows = grid.len() as u32;
            let columns = grid.iter().map(Vec::len).max().unwrap_or(0) as u32;
            if range.end.row >= rows || range.end.column >= columns {
                return failure("out_of_range", &range.to_string());
            }

            let mut values = Vec::new();
            for r in 0..range.rows() {
                let mut row = Vec::new();
                for c in 0..range.columns() {
                    let cell = range.cell_at(r, c);
                    let value = grid[cell.row as usize]
                        .get(cell.column as usize)
                        .cloned()
                        .unwrap_or(CellValue::Empty);
                    row.push(value);
                }
                values.push(row);
            }
            json!({"ok": true, "values": values})
        }
        Some("close") => {
            let id = request["document"].as_str().unwrap_or_default();
            if state.documents.remove(id).is_some() {
                owned.retain(|owned_id| owned_id != id);
                state.stats.open_documents -= 1;
                json!({"ok": true})
            } else {
                failure("no_such_document", id)
            }
        }
        _ => failure("unknown_op", &request.to_string()),
    }
}

fn failure(code: &str, message: &str) -> Value {
    json!({"ok": false, "code": code, "error": message})
}

/// 逗号分隔；数字为数值，空为 null
fn read_csv(path: &Path) -> Result<Vec<Vec<CellValue>>, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    Ok(content
        .lines()
        .map(|line| {
            line.split(',')
                .map(|raw| {
                    let raw = raw.trim();
                    if raw.is_empty() {
                        CellValue::Empty
                    } else if let Ok(n) = raw.parse::<f64>() {
                        CellValue::Number(n)
                    } else {
                        CellValue::Text(raw.to_string())
                    }
                })
                .collect()
        })
        .collect())
}

/// 评估目录沙盒
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn submission(&self, assignment: &str, file: &str, csv: &str) {
        let dir = self.root().join("assignments").join(assignment);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), csv).unwrap();
    }

    pub fn expected(&self, assignment: &str, toml_src: &str) {
        let dir = self.root().join("solutions").join(assignment);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("expected.toml"), toml_src).unwrap();
    }

    pub fn report_path(&self) -> PathBuf {
        self.root().join("evaluations").join("report.jsonl")
    }

    pub fn report_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.report_path())
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
