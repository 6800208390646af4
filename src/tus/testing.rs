// 测试用内存会话服务
//
// 支持注入写入故障、部分接收、合并轮询脚本

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::tus::{Metadata, SessionHandle, UploadError, UploadResult, UploadSessionService};

/// 写入故障
pub enum WriteFault {
    /// 拒绝写入，不接收任何数据
    Reject(UploadError),
    /// 数据已落盘，但客户端收到错误（例如响应丢失）
    AcceptThenFail(UploadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Default)]
struct MockSession {
    size: u64,
    partial: bool,
    metadata: Metadata,
    data: Vec<u8>,
    is_final: bool,
}

#[derive(Default)]
struct MockState {
    sessions: HashMap<String, MockSession>,
    writes: HashMap<String, Vec<WriteRecord>>,
    write_faults: VecDeque<WriteFault>,
    create_faults: VecDeque<UploadError>,
    poll_script: VecDeque<(Option<u64>, Option<u64>)>,
    failing_sizes: Vec<u64>,
    terminated: Vec<String>,
    concatenations: Vec<Vec<String>>,
}

#[derive(Default)]
pub struct MockSessionService {
    state: Mutex<MockState>,
    next_id: AtomicUsize,
    accept_at_most: Option<u64>,
    pub create_calls: AtomicUsize,
    pub write_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
}

impl MockSessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次写入最多接收 `n` 字节
    pub fn accept_at_most(mut self, n: u64) -> Self {
        self.accept_at_most = Some(n);
        self
    }

    pub fn push_write_fault(&self, fault: WriteFault) {
        self.state.lock().write_faults.push_back(fault);
    }

    pub fn push_create_fault(&self, error: UploadError) {
        self.state.lock().create_faults.push_back(error);
    }

    /// 声明大小为 `size` 的会话写入总是网络错误
    pub fn fail_writes_for_size(&self, size: u64) {
        self.state.lock().failing_sizes.push(size);
    }

    /// 合并会话的轮询结果脚本，耗尽后返回真实状态
    pub fn script_polls(&self, polls: Vec<(Option<u64>, Option<u64>)>) {
        self.state.lock().poll_script.extend(polls);
    }

    /// 预先写入数据（模拟之前的上传已被服务端接收）
    pub fn preload(&self, location: &str, data: &[u8]) {
        if let Some(session) = self.state.lock().sessions.get_mut(location) {
            session.data.extend_from_slice(data);
        }
    }

    pub fn content(&self, location: &str) -> Vec<u8> {
        self.state
            .lock()
            .sessions
            .get(location)
            .map(|s| s.data.clone())
            .unwrap_or_default()
    }

    pub fn metadata(&self, location: &str) -> Option<Metadata> {
        self.state
            .lock()
            .sessions
            .get(location)
            .map(|s| s.metadata.clone())
    }

    pub fn writes(&self, location: &str) -> Vec<WriteRecord> {
        self.state
            .lock()
            .writes
            .get(location)
            .cloned()
            .unwrap_or_default()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.state.lock().terminated.clone()
    }

    pub fn concatenations(&self) -> Vec<Vec<String>> {
        self.state.lock().concatenations.clone()
    }

    /// 所有仍存在的分片会话地址
    pub fn partial_locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = self
            .state
            .lock()
            .sessions
            .iter()
            .filter(|(_, s)| s.partial)
            .map(|(l, _)| l.clone())
            .collect();
        locations.sort();
        locations
    }

    fn handle(location: &str, session: &MockSession) -> SessionHandle {
        SessionHandle {
            location: location.to_string(),
            remote_offset: Some(session.data.len() as u64),
            remote_size: Some(session.size),
            partial: session.partial,
            metadata: session.metadata.clone(),
        }
    }
}

#[async_trait]
impl UploadSessionService for MockSessionService {
    async fn create_session(
        &self,
        size: u64,
        partial: bool,
        metadata: &Metadata,
    ) -> UploadResult<SessionHandle> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(error) = state.create_faults.pop_front() {
            return Err(error);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let location = format!("/files/{:04}", id);
        let session = MockSession {
            size,
            partial,
            metadata: metadata.clone(),
            ..Default::default()
        };
        let handle = Self::handle(&location, &session);
        state.sessions.insert(location, session);
        Ok(handle)
    }

    async fn write_at(&self, location: &str, offset: u64, data: Vec<u8>) -> UploadResult<u64> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let fault = state.write_faults.pop_front();
        let failing = {
            let size = state.sessions.get(location).map(|s| s.size);
            size.is_some_and(|size| state.failing_sizes.contains(&size))
        };

        let session = state
            .sessions
            .get_mut(location)
            .ok_or_else(|| UploadError::Protocol(format!("会话不存在: {}", location)))?;

        if failing {
            return Err(UploadError::Network("connection reset".into()));
        }
        let fault = match fault {
            Some(WriteFault::Reject(error)) => return Err(error),
            other => other,
        };
        if offset != session.data.len() as u64 {
            return Err(UploadError::Protocol(format!(
                "偏移量不一致: expected={}, got={}",
                session.data.len(),
                offset
            )));
        }

        let accepted = match self.accept_at_most {
            Some(n) => (data.len() as u64).min(n) as usize,
            None => data.len(),
        };
        let accepted = accepted.min((session.size - offset) as usize);
        session.data.extend_from_slice(&data[..accepted]);
        let new_offset = session.data.len() as u64;

        state
            .writes
            .entry(location.to_string())
            .or_default()
            .push(WriteRecord {
                offset,
                len: accepted as u64,
            });

        match fault {
            Some(WriteFault::AcceptThenFail(error)) => Err(error),
            _ => Ok(new_offset),
        }
    }

    async fn get_session(&self, location: &str) -> UploadResult<SessionHandle> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let is_final = state
            .sessions
            .get(location)
            .map(|s| s.is_final)
            .ok_or_else(|| UploadError::Protocol(format!("会话不存在: {}", location)))?;

        if is_final {
            if let Some((offset, size)) = state.poll_script.pop_front() {
                let session = &state.sessions[location];
                let mut handle = Self::handle(location, session);
                handle.remote_offset = offset;
                handle.remote_size = size;
                return Ok(handle);
            }
        }
        Ok(Self::handle(location, &state.sessions[location]))
    }

    async fn concatenate_sessions(
        &self,
        parts: &[SessionHandle],
        metadata: &Metadata,
    ) -> UploadResult<SessionHandle> {
        let mut state = self.state.lock();
        let mut data = Vec::new();
        for part in parts {
            let session = state.sessions.get(&part.location).ok_or_else(|| {
                UploadError::Protocol(format!("分片会话不存在: {}", part.location))
            })?;
            if !session.partial || session.data.len() as u64 != session.size {
                return Err(UploadError::Protocol(format!(
                    "分片会话未完成: {}",
                    part.location
                )));
            }
            data.extend_from_slice(&session.data);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let location = format!("/files/{:04}", id);
        let session = MockSession {
            size: data.len() as u64,
            partial: false,
            metadata: metadata.clone(),
            data,
            is_final: true,
        };
        let mut handle = Self::handle(&location, &session);
        handle.remote_offset = None;
        state
            .concatenations
            .push(parts.iter().map(|p| p.location.clone()).collect());
        state.sessions.insert(location, session);
        Ok(handle)
    }

    async fn terminate_session(&self, location: &str) -> UploadResult<()> {
        let mut state = self.state.lock();
        state
            .sessions
            .remove(location)
            .ok_or_else(|| UploadError::Protocol(format!("会话不存在: {}", location)))?;
        state.terminated.push(location.to_string());
        Ok(())
    }
}
