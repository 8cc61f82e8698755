//! Minimal Wavefront OBJ reader: positions, normals and polygonal faces,
//! split into one part per `o`/`g` group.

use anyhow::{bail, Context, Result};
use glam::Vec3;
use octahedral::{MeshPart, SourceMesh};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

/// Face corner: position index and optional normal index, both 0-based.
type Corner = (u32, Option<u32>);

#[derive(Default)]
struct PartBuilder {
    remap: HashMap<Corner, u32>,
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    indices: Vec<u32>,
    all_corners_have_normals: bool,
}

impl PartBuilder {
    fn new() -> Self {
        Self {
            all_corners_have_normals: true,
            ..Default::default()
        }
    }

    fn corner(&mut self, c: Corner, positions: &[Vec3], normals: &[Vec3]) -> u32 {
        if let Some(&i) = self.remap.get(&c) {
            return i;
        }
        let i = self.positions.len() as u32;
        self.positions.push(positions[c.0 as usize]);
        match c.1 {
            Some(n) => self.normals.push(normals[n as usize]),
            None => {
                self.all_corners_have_normals = false;
                self.normals.push(Vec3::ZERO);
            }
        }
        self.remap.insert(c, i);
        i
    }

    fn finish(self) -> Option<MeshPart> {
        if self.indices.is_empty() {
            return None;
        }
        let part = MeshPart::new(self.positions, self.indices);
        Some(if self.all_corners_have_normals {
            part.with_normals(self.normals)
        } else {
            // Missing normals are derived from faces during isolation.
            part
        })
    }
}

/// Resolves a 1-based (or negative, relative) OBJ index.
fn resolve_index(raw: &str, len: usize, line_no: usize) -> Result<u32> {
    let i: i64 = raw
        .parse()
        .with_context(|| format!("line {line_no}: bad index {raw:?}"))?;
    let resolved = if i > 0 { i - 1 } else { len as i64 + i };
    if i == 0 || resolved < 0 || resolved >= len as i64 {
        bail!("line {line_no}: index {i} out of range (have {len})");
    }
    Ok(resolved as u32)
}

fn parse_vec3<'a>(mut parts: impl Iterator<Item = &'a str>, line_no: usize) -> Result<Vec3> {
    let mut v = [0.0f32; 3];
    for (k, slot) in v.iter_mut().enumerate() {
        *slot = parts
            .next()
            .with_context(|| format!("line {line_no}: missing component {k}"))?
            .parse()
            .with_context(|| format!("line {line_no}: bad number"))?;
    }
    Ok(Vec3::from_array(v))
}

/// Parses OBJ text into a source mesh. Faces are fan-triangulated;
/// texture coordinates, materials and free-form geometry are ignored.
pub fn parse_obj<R: BufRead>(reader: R) -> Result<SourceMesh> {
    let mut positions: Vec<Vec3> = Vec::new();
    let mut normals: Vec<Vec3> = Vec::new();
    let mut parts: Vec<MeshPart> = Vec::new();
    let mut current = PartBuilder::new();

    for (k, line) in reader.lines().enumerate() {
        let line_no = k + 1;
        let line = line?;
        let trimmed = line.trim();
        let mut tokens = trimmed.split_whitespace();

        match tokens.next() {
            Some("v") => {
                let p = parse_vec3(tokens, line_no)?;
                if !p.is_finite() {
                    bail!("line {line_no}: non-finite vertex");
                }
                positions.push(p);
            }
            Some("vn") => normals.push(parse_vec3(tokens, line_no)?.normalize_or_zero()),
            Some("o") | Some("g") => {
                let done = std::mem::replace(&mut current, PartBuilder::new());
                parts.extend(done.finish());
            }
            Some("f") => {
                let mut face = Vec::with_capacity(4);
                for corner in tokens {
                    let mut refs = corner.split('/');
                    let v = resolve_index(refs.next().unwrap_or(""), positions.len(), line_no)?;
                    let n = match refs.nth(1) {
                        Some(raw) if !raw.is_empty() => {
                            Some(resolve_index(raw, normals.len(), line_no)?)
                        }
                        _ => None,
                    };
                    face.push(current.corner((v, n), &positions, &normals));
                }
                if face.len() < 3 {
                    bail!("line {line_no}: face with {} corners", face.len());
                }
                for k in 1..face.len() - 1 {
                    current.indices.extend([face[0], face[k], face[k + 1]]);
                }
            }
            _ => {}
        }
    }
    parts.extend(current.finish());

    if parts.is_empty() {
        bail!("no faces");
    }
    log::debug!(
        "Parsed OBJ: {} positions, {} parts ({})",
        positions.len(),
        parts.len(),
        parts.iter().map(MeshPart::triangle_count).sum::<usize>()
    );
    Ok(SourceMesh::new(parts))
}

pub fn load(path: &Path) -> Result<SourceMesh> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_obj(BufReader::new(file)).with_context(|| format!("parsing {}", path.display()))
}

#[inline]
pub fn is_obj(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("obj"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
# unit quad
v 0 0 0
v 1 0 0
v 1 0 1
v 0 0 1
vn 0 1 0
f 1//1 2//1 3//1 4//1
";

    #[test]
    fn quads_are_fan_triangulated() {
        let mesh = parse_obj(QUAD.as_bytes()).unwrap();
        assert_eq!(mesh.parts.len(), 1);
        let part = &mesh.parts[0];
        assert_eq!(part.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(part.normals, vec![Vec3::Y; 4]);
    }

    #[test]
    fn groups_become_parts_with_local_indices() {
        let src = "\
v 0 0 0
v 1 0 0
v 0 1 0
v 5 5 5
o second
f -4 -3 -2
g third
f 2 3 4
";
        let mesh = parse_obj(src.as_bytes()).unwrap();
        assert_eq!(mesh.parts.len(), 2);
        assert_eq!(mesh.parts[0].indices, vec![0, 1, 2]);
        assert_eq!(mesh.parts[1].positions[2], Vec3::splat(5.0));
        // No normals in the file: left for isolation to derive.
        assert!(mesh.parts[1].normals.is_empty());
    }

    #[test]
    fn texture_coordinates_are_skipped() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 2/1/1 3/1/1\nf 1/1 2/1 3/1\n";
        let mesh = parse_obj(src.as_bytes()).unwrap();
        let part = &mesh.parts[0];
        assert_eq!(part.triangle_count(), 2);
        // The second face has no normals, so the part falls back to derived ones.
        assert!(part.normals.is_empty());
        assert_eq!(part.positions.len(), 6);
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(parse_obj("v 0 0 0\nf 1 2 3\n".as_bytes()).is_err());
        assert!(parse_obj("v 0 0\n".as_bytes()).is_err());
        assert!(parse_obj("v 0 0 0\n".as_bytes()).is_err());
        assert!(parse_obj("v 0 0 0\nv 1 0 0\nf 1 2\n".as_bytes()).is_err());
    }

    #[test]
    fn only_obj_files_are_picked_up() {
        assert!(is_obj(Path::new("a/b/Tree.OBJ")));
        assert!(!is_obj(Path::new("a/b/tree.mtl")));
        assert!(!is_obj(Path::new("a/b/obj")));
    }
}
