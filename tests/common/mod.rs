#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use attendrs::audit::{AuditEntry, AuditSink};
use attendrs::config::GatePolicy;
use attendrs::{GateResult, LoadedFace, PairScorer, SimilarityConfig, SimilarityGate};
use image::{GrayImage, ImageFormat, Luma};

/// Oval face on a dark background; `eye_offset` moves the eyes apart.
pub fn synthetic_face(side: u32, eye_offset: i32) -> GrayImage {
    let c = side as f32 / 2.0;
    let eye_y = side as f32 * 0.4;
    let eye_dx = side as f32 * 0.18 + eye_offset as f32;
    GrayImage::from_fn(side, side, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        let oval = ((fx - c) / (side as f32 * 0.35)).powi(2)
            + ((fy - c) / (side as f32 * 0.45)).powi(2);
        let in_eye =
            |ex: f32| (fx - ex).powi(2) + (fy - eye_y).powi(2) < (side as f32 * 0.06).powi(2);
        let value = if oval > 1.0 {
            40
        } else if in_eye(c - eye_dx) || in_eye(c + eye_dx) {
            70
        } else {
            150 + ((fx - c).abs() as u8 / 4)
        };
        Luma([value])
    })
}

/// Two-level stripes; `vertical` stripes vary along x.
pub fn stripes(side: u32, period: u32, vertical: bool) -> GrayImage {
    GrayImage::from_fn(side, side, |x, y| {
        let t = if vertical { x } else { y };
        Luma([if (t / (period / 2)) % 2 == 0 { 230 } else { 20 }])
    })
}

pub fn png_bytes(img: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encoding");
    bytes
}

pub fn ready(origin: &str, img: &GrayImage) -> LoadedFace {
    LoadedFace::from_bytes(origin, &png_bytes(img))
}

/// Lay out a student directory the way the capture workflow does.
pub fn write_student(root: &Path, id: &str, faces: &[GrayImage]) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    for (i, face) in faces.iter().enumerate() {
        fs::write(dir.join(format!("{id}_{i:03}.png")), png_bytes(face)).unwrap();
    }
}

pub fn write_garbage(root: &Path, id: &str, count: usize) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        fs::write(dir.join(format!("{id}_{i:03}.jpg")), b"\xff\xd8 truncated").unwrap();
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    pub entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAudit {
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl AuditSink for MemoryAudit {
    fn append(&self, entry: &AuditEntry) -> GateResult<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

pub fn gate_with(policy: GatePolicy) -> (SimilarityGate, Arc<MemoryAudit>) {
    let audit = Arc::new(MemoryAudit::default());
    let scorer = PairScorer::new(SimilarityConfig::default()).unwrap();
    let gate = SimilarityGate::new(policy, scorer, audit.clone(), "test-admin").unwrap();
    (gate, audit)
}

pub fn gate() -> (SimilarityGate, Arc<MemoryAudit>) {
    gate_with(GatePolicy::default())
}
