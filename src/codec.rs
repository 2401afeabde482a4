use ndarray::ArrayView2;

use crate::error::{GlprError, GlprErrorKind};

// CHARS for german license plates, class id = position
pub const ALPHABET: [char; 41] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M',
             'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
             'Ä', 'Ö', 'Ü', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
             '-', ' '
             ];

/// Number of output classes the model has to produce per timestep,
/// the extra one is the CTC blank
pub const NUM_CLASSES: usize = ALPHABET.len() + 1;

pub struct LabelCodec;

impl LabelCodec {

    /// Translate characters to their numerical classes
    pub fn encode(number: &str) -> Result<Vec<usize>, GlprError> {
        number.chars().map(|c| {
            ALPHABET.iter().position(|a| *a == c)
                .ok_or_else(|| GlprError::from(GlprErrorKind::UnknownCharacter(c)))
        }).collect()
    }

    /// Reverse translation of numerical classes back to characters.
    /// All indexes must be valid alphabet positions.
    pub fn decode(label: &[usize]) -> String {
        label.iter().map(|index| ALPHABET[*index]).collect()
    }

    /// Decode a raw per-timestep prediction matrix (timesteps x classes).
    /// Takes the arg-max of every timestep, collapses runs of the same
    /// class and drops everything outside the alphabet as blank.
    pub fn decode_prediction(prediction: ArrayView2<f32>) -> String {
        let argmax = argmax_in_axis1(&prediction);
        argmax.iter().enumerate().filter(|(i, v)| {
            (*i == 0 || **v != argmax[i-1]) && **v < ALPHABET.len()
        }).map(|(_, v)| ALPHABET[*v]).collect()
    }

}

// arg-max over the class axis, first maximum wins
fn argmax_in_axis1(input: &ArrayView2<f32>) -> Vec<usize> {
    input.rows().into_iter().map(|row| {
        let mut max = row[0];
        let mut index = 0;
        row.iter().enumerate().for_each(|(i, v)| {
            if *v > max {
                max = *v;
                index = i;
            }
        });
        index
    }).collect()
}
