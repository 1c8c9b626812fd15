use std::path::Path;

use ndarray::{Array2, ShapeBuilder};
use tracing::trace;

use crate::error::ValidationError;

const MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F4 { big_endian: bool },
    F8 { big_endian: bool },
}

impl Dtype {
    fn parse(descr: &str) -> Option<Self> {
        let (order, kind) = descr.split_at_checked(1)?;
        let big_endian = match order {
            "<" | "=" => false,
            ">" => true,
            _ => return None,
        };
        match kind {
            "f4" => Some(Self::F4 { big_endian }),
            "f8" => Some(Self::F8 { big_endian }),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::F4 { .. } => 4,
            Self::F8 { .. } => 8,
        }
    }

    fn decode(self, chunk: &[u8]) -> f64 {
        match self {
            Self::F4 { big_endian } => {
                let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
                let v = if big_endian {
                    f32::from_be_bytes(bytes)
                } else {
                    f32::from_le_bytes(bytes)
                };
                f64::from(v)
            }
            Self::F8 { big_endian } => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                if big_endian {
                    f64::from_be_bytes(bytes)
                } else {
                    f64::from_le_bytes(bytes)
                }
            }
        }
    }
}

#[derive(Debug)]
struct Header {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Read a 2D float matrix from an `.npy` file.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>, ValidationError> {
    let bytes = std::fs::read(path).map_err(|source| ValidationError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_matrix(path, &bytes)
}

/// Decode `.npy` bytes; `path` is only used for error messages.
pub fn parse_matrix(path: &Path, bytes: &[u8]) -> Result<Array2<f64>, ValidationError> {
    let (header, data) = split_header(path, bytes)?;
    trace!(?header, "Parsed npy header");

    let dtype = Dtype::parse(&header.descr).ok_or_else(|| ValidationError::UnsupportedDtype {
        path: path.to_path_buf(),
        descr: header.descr.clone(),
    })?;
    let [rows, cols] = header.shape[..] else {
        return Err(ValidationError::NotTwoDimensional {
            path: path.to_path_buf(),
            shape: header.shape,
        });
    };

    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(dtype.size()))
        .ok_or_else(|| ValidationError::malformed(path, "shape overflows"))?;
    if data.len() < expected {
        return Err(ValidationError::malformed(
            path,
            format!(
                "expected {expected} bytes of data for shape ({rows}, {cols}), found {}",
                data.len()
            ),
        ));
    }

    let values: Vec<f64> = data[..expected]
        .chunks_exact(dtype.size())
        .map(|chunk| dtype.decode(chunk))
        .collect();
    let shape = (rows, cols).set_f(header.fortran_order);
    let matrix = Array2::from_shape_vec(shape, values)
        .map_err(|e| ValidationError::malformed(path, e.to_string()))?
        .as_standard_layout()
        .into_owned();

    if let Some(row) = matrix
        .rows()
        .into_iter()
        .position(|r| r.iter().any(|v| !v.is_finite()))
    {
        return Err(ValidationError::NonFinite {
            path: path.to_path_buf(),
            row,
        });
    }
    Ok(matrix)
}

fn split_header<'a>(path: &Path, bytes: &'a [u8]) -> Result<(Header, &'a [u8]), ValidationError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(ValidationError::malformed(path, "not an npy file"));
    }
    let major = bytes[6];
    let (len, start) = match major {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(ValidationError::malformed(path, "truncated header"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => {
            return Err(ValidationError::malformed(
                path,
                format!("unsupported npy version {v}"),
            ));
        }
    };
    let end = start + len;
    if bytes.len() < end {
        return Err(ValidationError::malformed(path, "truncated header"));
    }
    let text = std::str::from_utf8(&bytes[start..end])
        .map_err(|_| ValidationError::malformed(path, "header is not valid text"))?;
    let header = parse_header(text).ok_or_else(|| {
        ValidationError::malformed(path, format!("unrecognised header {:?}", text.trim()))
    })?;
    Ok((header, &bytes[end..]))
}

/// Parse the Python dict literal, e.g.
/// `{'descr': '<f4', 'fortran_order': False, 'shape': (3, 4), }`.
fn parse_header(text: &str) -> Option<Header> {
    let descr = value_after(text, "descr")?;
    let descr = descr
        .strip_prefix('\'')
        .or_else(|| descr.strip_prefix('"'))?;
    let descr = descr[..descr.find(['\'', '"'])?].to_string();

    let fortran = value_after(text, "fortran_order")?;
    let fortran_order = if fortran.starts_with("True") {
        true
    } else if fortran.starts_with("False") {
        false
    } else {
        return None;
    };

    let shape = value_after(text, "shape")?.strip_prefix('(')?;
    let shape = &shape[..shape.find(')')?];
    let shape = shape
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.trim_end_matches('L').parse::<usize>().ok())
        .collect::<Option<Vec<_>>>()?;

    Some(Header {
        descr,
        fortran_order,
        shape,
    })
}

fn value_after<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let quoted = [format!("'{key}'"), format!("\"{key}\"")];
    let at = quoted
        .iter()
        .find_map(|q| text.find(q.as_str()).map(|i| i + q.len()))?;
    let rest = text[at..].trim_start().strip_prefix(':')?;
    Some(rest.trim_start())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::array;

    /// Encode a version 1 file laid out the way `np.save` writes it.
    pub(crate) fn npy_bytes(descr: &str, fortran: bool, shape: &[usize], data: &[u8]) -> Vec<u8> {
        let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
        let shape = if dims.len() == 1 {
            format!("({},)", dims[0])
        } else {
            format!("({})", dims.join(", "))
        };
        let fortran = if fortran { "True" } else { "False" };
        let mut header =
            format!("{{'descr': '{descr}', 'fortran_order': {fortran}, 'shape': {shape}, }}");
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(data);
        out
    }

    pub(crate) fn f8_le(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn reads_c_order_f8() {
        let bytes = npy_bytes("<f8", false, &[2, 3], &f8_le(&[1., 2., 3., 4., 5., 6.]));
        let m = parse_matrix(Path::new("x.npy"), &bytes).unwrap();
        assert_eq!(m, array![[1., 2., 3.], [4., 5., 6.]]);
    }

    #[test]
    fn reads_fortran_order_and_f4() {
        let data: Vec<u8> = [1f32, 4., 2., 5., 3., 6.]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let bytes = npy_bytes("<f4", true, &[2, 3], &data);
        let m = parse_matrix(Path::new("x.npy"), &bytes).unwrap();
        assert_eq!(m, array![[1., 2., 3.], [4., 5., 6.]]);
        assert!(m.is_standard_layout());
    }

    #[test]
    fn reads_big_endian() {
        let data: Vec<u8> = [0.5f64, -2.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        let bytes = npy_bytes(">f8", false, &[1, 2], &data);
        let m = parse_matrix(Path::new("x.npy"), &bytes).unwrap();
        assert_eq!(m, array![[0.5, -2.0]]);
    }

    #[test]
    fn rejects_vectors_and_integer_dtypes() {
        let vector = npy_bytes("<f8", false, &[3], &f8_le(&[1., 2., 3.]));
        assert!(matches!(
            parse_matrix(Path::new("v.npy"), &vector),
            Err(ValidationError::NotTwoDimensional { shape, .. }) if shape == vec![3]
        ));
        let ints = npy_bytes("<i8", false, &[1, 1], &1i64.to_le_bytes());
        assert!(matches!(
            parse_matrix(Path::new("i.npy"), &ints),
            Err(ValidationError::UnsupportedDtype { descr, .. }) if descr == "<i8"
        ));
    }

    #[test]
    fn rejects_truncated_data_and_non_finite_rows() {
        let short = npy_bytes("<f8", false, &[2, 2], &f8_le(&[1., 2., 3.]));
        assert!(matches!(
            parse_matrix(Path::new("s.npy"), &short),
            Err(ValidationError::Malformed { .. })
        ));
        let nan = npy_bytes("<f8", false, &[2, 1], &f8_le(&[1., f64::NAN]));
        assert!(matches!(
            parse_matrix(Path::new("n.npy"), &nan),
            Err(ValidationError::NonFinite { row: 1, .. })
        ));
        assert!(matches!(
            parse_matrix(Path::new("t.npy"), b"hello world"),
            Err(ValidationError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let err = read_matrix(Path::new("/definitely/not/here.npy")).unwrap_err();
        assert!(matches!(err, ValidationError::Unreadable { .. }));
    }
}
