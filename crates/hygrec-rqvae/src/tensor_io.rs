//! Moving data between burn tensors, `ndarray` arrays and code lists.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use ndarray::{Array2, ArrayView2};

/// Copy a float tensor into an `f64` array (k-means and Sinkhorn precision).
pub(crate) fn to_array2<B: Backend>(tensor: Tensor<B, 2>) -> Array2<f64> {
    let [n, d] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .expect("float tensor to vec");
    Array2::from_shape_vec((n, d), values).expect("tensor shape matches its data")
}

/// Copy a float tensor into an `f32` array.
pub(crate) fn to_array2_f32<B: Backend>(tensor: Tensor<B, 2>) -> Array2<f32> {
    let [n, d] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .expect("float tensor to vec");
    Array2::from_shape_vec((n, d), values).expect("tensor shape matches its data")
}

pub(crate) fn from_array2<B: Backend>(array: ArrayView2<f32>, device: &B::Device) -> Tensor<B, 2> {
    let (n, d) = array.dim();
    let values: Vec<f32> = array.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [n, d]), device)
}

pub(crate) fn codes_to_tensor<B: Backend>(codes: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = codes.iter().map(|&c| c as i64).collect();
    Tensor::from_data(TensorData::new(values, [codes.len()]), device)
}

#[cfg(test)]
pub(crate) fn tensor_to_codes<B: Backend>(tensor: Tensor<B, 1, Int>) -> Vec<usize> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .expect("int tensor to vec")
        .into_iter()
        .map(|c| c as usize)
        .collect()
}

/// `[N, L]` code tensor to one `Vec` of L codes per item.
pub(crate) fn code_rows<B: Backend>(tensor: Tensor<B, 2, Int>) -> Vec<Vec<usize>> {
    let [_, levels] = tensor.dims();
    let flat = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .expect("int tensor to vec");
    if levels == 0 {
        return Vec::new();
    }
    flat.chunks(levels)
        .map(|row| row.iter().map(|&c| c as usize).collect())
        .collect()
}

#[cfg(test)]
pub(crate) fn rows_to_code_tensor<B: Backend>(
    codes: &[Vec<usize>],
    levels: usize,
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    let values: Vec<i64> = codes
        .iter()
        .flat_map(|row| row.iter().map(|&c| c as i64))
        .collect();
    Tensor::from_data(TensorData::new(values, [codes.len(), levels]), device)
}
