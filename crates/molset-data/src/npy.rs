// NumPy `.npy` array files — the load primitive behind GlobDataset
//
// One array per file. Floats are widened to f64 and integers to i64 so the
// datasets only ever deal with two element types. Only C-ordered arrays are
// accepted; that is what `np.save` writes unless told otherwise.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use npyz::{DType, NpyFile, Order, TypeChar, TypeStr, WriterBuilder};

use molset_core::{Error, Result};

fn open(path: &Path) -> Result<NpyFile<BufReader<File>>> {
    let file = File::open(path).map_err(|e| Error::file_access(path, e))?;
    NpyFile::new(BufReader::new(file)).map_err(|e| Error::format(path, e.to_string()))
}

fn plain_type<R: Read>(npy: &NpyFile<R>, path: &Path) -> Result<TypeStr> {
    match npy.dtype() {
        DType::Plain(ts) => Ok(ts),
        other => Err(Error::format(
            path,
            format!("structured dtype {other:?} is not a plain numeric array"),
        )),
    }
}

fn shape_of<R: Read>(npy: &NpyFile<R>, path: &Path) -> Result<Vec<usize>> {
    if matches!(npy.order(), Order::Fortran) {
        return Err(Error::format(path, "Fortran-ordered arrays are not supported"));
    }
    Ok(npy.shape().iter().map(|&d| d as usize).collect())
}

fn decode<T: npyz::Deserialize, R: Read>(npy: NpyFile<R>, path: &Path) -> Result<Vec<T>> {
    npy.into_vec::<T>()
        .map_err(|e| Error::format(path, e.to_string()))
}

fn into_array<T>(shape: Vec<usize>, data: Vec<T>, path: &Path) -> Result<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| Error::format(path, e.to_string()))
}

/// Load an array of any real or integer dtype as `f64`.
pub fn read_f64(path: impl AsRef<Path>) -> Result<ArrayD<f64>> {
    let path = path.as_ref();
    let npy = open(path)?;
    let shape = shape_of(&npy, path)?;
    let ts = plain_type(&npy, path)?;

    let data: Vec<f64> = match (ts.type_char(), ts.size_field()) {
        (TypeChar::Float, 8) => decode::<f64, _>(npy, path)?,
        (TypeChar::Float, 4) => decode::<f32, _>(npy, path)?
            .into_iter()
            .map(f64::from)
            .collect(),
        (TypeChar::Int, _) | (TypeChar::Uint, _) => decode_ints(npy, &ts, path)?
            .into_iter()
            .map(|v| v as f64)
            .collect(),
        _ => return Err(Error::format(path, format!("unsupported dtype {ts}"))),
    };
    into_array(shape, data, path)
}

/// Load an array of integers as `i64`.
///
/// Float arrays are accepted when every value is integral, since atomic
/// numbers are often stored as floats.
pub fn read_i64(path: impl AsRef<Path>) -> Result<ArrayD<i64>> {
    let path = path.as_ref();
    let npy = open(path)?;
    let shape = shape_of(&npy, path)?;
    let ts = plain_type(&npy, path)?;

    let data = match ts.type_char() {
        TypeChar::Int | TypeChar::Uint => decode_ints(npy, &ts, path)?,
        TypeChar::Float => {
            let floats: Vec<f64> = match ts.size_field() {
                8 => decode::<f64, _>(npy, path)?,
                4 => decode::<f32, _>(npy, path)?
                    .into_iter()
                    .map(f64::from)
                    .collect(),
                _ => return Err(Error::format(path, format!("unsupported dtype {ts}"))),
            };
            floats
                .into_iter()
                .map(|v| integral_to_i64(v, path))
                .collect::<Result<Vec<i64>>>()?
        }
        _ => return Err(Error::format(path, format!("unsupported dtype {ts}"))),
    };
    into_array(shape, data, path)
}

/// Narrow a float that must hold a whole number, such as an atomic number.
pub(crate) fn integral_to_i64(v: f64, path: &Path) -> Result<i64> {
    if v.fract() == 0.0 && v.abs() <= i64::MAX as f64 {
        Ok(v as i64)
    } else {
        Err(Error::format(path, format!("non-integral value {v}")))
    }
}

fn decode_ints<R: Read>(npy: NpyFile<R>, ts: &TypeStr, path: &Path) -> Result<Vec<i64>> {
    let signed = matches!(ts.type_char(), TypeChar::Int);
    let widened = match (signed, ts.size_field()) {
        (true, 1) => decode::<i8, _>(npy, path)?.into_iter().map(i64::from).collect(),
        (true, 2) => decode::<i16, _>(npy, path)?.into_iter().map(i64::from).collect(),
        (true, 4) => decode::<i32, _>(npy, path)?.into_iter().map(i64::from).collect(),
        (true, 8) => decode::<i64, _>(npy, path)?,
        (false, 1) => decode::<u8, _>(npy, path)?.into_iter().map(i64::from).collect(),
        (false, 2) => decode::<u16, _>(npy, path)?.into_iter().map(i64::from).collect(),
        (false, 4) => decode::<u32, _>(npy, path)?.into_iter().map(i64::from).collect(),
        (false, 8) => decode::<u64, _>(npy, path)?
            .into_iter()
            .map(|v| {
                i64::try_from(v).map_err(|_| Error::format(path, format!("{v} overflows i64")))
            })
            .collect::<Result<Vec<i64>>>()?,
        _ => return Err(Error::format(path, format!("unsupported dtype {ts}"))),
    };
    Ok(widened)
}

/// Write a C-ordered array with the element type's native dtype.
pub fn write<T>(path: impl AsRef<Path>, array: &ArrayD<T>) -> Result<()>
where
    T: npyz::Serialize + npyz::AutoSerialize + Clone,
{
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::file_access(path, e))?;
    let shape: Vec<u64> = array.shape().iter().map(|&d| d as u64).collect();
    let mut writer = npyz::WriteOptions::<T>::new()
        .default_dtype()
        .shape(&shape)
        .writer(BufWriter::new(file))
        .begin_nd()?;
    // iter() walks in logical (row-major) order regardless of memory layout
    writer.extend(array.iter().cloned())?;
    writer.finish()?;
    Ok(())
}
