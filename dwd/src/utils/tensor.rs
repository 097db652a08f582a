use crate::common::*;
use ndarray::{Array, Dimension, IxDyn};
use tch::kind::Element;

/// Copies an array into a CPU tensor of the same shape.
pub fn array_to_tensor<A, D>(array: &Array<A, D>) -> Result<Tensor>
where
    A: Element + Copy,
    D: Dimension,
{
    let shape: Vec<i64> = array.shape().iter().map(|&size| size as i64).collect();
    let values: Vec<A> = array.iter().copied().collect();
    let tensor = Tensor::f_of_slice(&values)?.f_view(shape.as_slice())?;
    Ok(tensor)
}

/// Copies a tensor into an array of the given dimensionality.
pub fn tensor_to_array<A, D>(tensor: &Tensor) -> Result<Array<A, D>>
where
    A: Element + Copy + Default,
    D: Dimension,
{
    let shape: Vec<usize> = tensor.size().iter().map(|&size| size as usize).collect();
    let tensor = tensor.to_device(Device::Cpu).to_kind(A::KIND).contiguous();
    let numel = shape.iter().product();
    let mut values = vec![A::default(); numel];
    tensor.f_copy_data(&mut values, numel)?;

    let array = Array::from_shape_vec(IxDyn(&shape), values)?.into_dimensionality::<D>()?;
    Ok(array)
}

/// Adds up tensors of the same shape.
pub fn f_sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Result<Tensor>
where
    T: std::borrow::Borrow<Tensor>,
{
    let mut iter = tensors.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| format_err!("the input iterator must not be empty"))?
        .borrow()
        .shallow_clone();
    let sum = iter.try_fold(first, |lhs, rhs| lhs.f_add(rhs.borrow()))?;
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Ix2};

    #[test]
    fn array_tensor_conversion() {
        let array = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let tensor = array_to_tensor(&array).unwrap();
        assert_eq!(tensor.size(), vec![2, 3]);
        assert_abs_diff_eq!(f64::from(tensor.sum(Kind::Float)), 21.0);

        let back: Array2<f32> = tensor_to_array::<f32, Ix2>(&tensor).unwrap();
        assert_eq!(back, array);
    }

    #[test]
    fn int_tensor_conversion() {
        let array = array![[1i64, -2], [3, 4]];
        let tensor = array_to_tensor(&array).unwrap();
        assert_eq!(tensor.kind(), Kind::Int64);
        assert_eq!(tensor_to_array::<i64, Ix2>(&tensor).unwrap(), array);
    }

    #[test]
    fn sum_of_tensors() {
        let tensors = vec![
            Tensor::of_slice(&[1.0f32, 2.0]),
            Tensor::of_slice(&[3.0f32, 4.0]),
        ];
        let sum = f_sum_tensors(&tensors).unwrap();
        assert_abs_diff_eq!(f64::from(sum.sum(Kind::Float)), 10.0);
        assert!(f_sum_tensors(Vec::<Tensor>::new()).is_err());
    }
}
