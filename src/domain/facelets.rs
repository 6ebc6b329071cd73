//! Facelet Reconstructor
//!
//! Rebuilds the full corner/edge state from the truncated arrays the cubes
//! transmit and renders it as a 54-character facelet string.
//!
//! Facelet indices follow the URFDLB convention, 9 stickers per face:
//!
//! ```text
//!              U0 U1 U2
//!              U3 U4 U5
//!              U6 U7 U8
//!  L36 L37 L38 F18 F19 F20 R9  R10 R11 B45 B46 B47
//!  L39 L40 L41 F21 F22 F23 R12 R13 R14 B48 B49 B50
//!  L42 L43 L44 F24 F25 F26 R15 R16 R17 B51 B52 B53
//!              D27 D28 D29
//!              D30 D31 D32
//!              D33 D34 D35
//! ```

use crate::domain::models::CubeState;
use thiserror::Error;

const FACES: [char; 6] = ['U', 'R', 'F', 'D', 'L', 'B'];

/// Facelet string of a solved cube
pub const SOLVED_FACELETS: &str =
    "UUUUUUUUURRRRRRRRRFFFFFFFFFDDDDDDDDDLLLLLLLLLBBBBBBBBB";

/// Sticker indices of each corner slot: URF, UFL, ULB, UBR, DFR, DLF, DBL, DRB
const CORNER_FACELET_MAP: [[usize; 3]; 8] = [
    [8, 9, 20],
    [6, 18, 38],
    [0, 36, 47],
    [2, 45, 11],
    [29, 26, 15],
    [27, 44, 24],
    [33, 53, 42],
    [35, 17, 51],
];

/// Sticker indices of each edge slot: UR, UF, UL, UB, DR, DF, DL, DB, FR, FL, BL, BR
const EDGE_FACELET_MAP: [[usize; 2]; 12] = [
    [5, 10],
    [7, 19],
    [3, 37],
    [1, 46],
    [32, 16],
    [28, 25],
    [30, 43],
    [34, 52],
    [23, 12],
    [21, 41],
    [50, 39],
    [48, 14],
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FaceletError {
    #[error("corner permutation out of range: {0:?}")]
    CornerPermutation([i32; 8]),
    #[error("corner orientation out of range: {0:?}")]
    CornerOrientation([u8; 8]),
    #[error("edge permutation out of range: {0:?}")]
    EdgePermutation([i32; 12]),
    #[error("edge orientation out of range: {0:?}")]
    EdgeOrientation([u8; 12]),
}

/// Missing corner permutation element: the full array sums to 28
pub fn corner_permutation_checksum(cp: &[u8; 7]) -> i32 {
    28 - cp.iter().map(|&v| i32::from(v)).sum::<i32>()
}

/// Missing corner orientation element: the full array sums to 0 mod 3
pub fn corner_orientation_checksum(co: &[u8; 7]) -> u8 {
    let sum: u32 = co.iter().map(|&v| u32::from(v)).sum();
    ((3 - sum % 3) % 3) as u8
}

/// Missing edge permutation element: the full array sums to 66
pub fn edge_permutation_checksum(ep: &[u8; 11]) -> i32 {
    66 - ep.iter().map(|&v| i32::from(v)).sum::<i32>()
}

/// Missing edge orientation element: the full array sums to 0 mod 2
pub fn edge_orientation_checksum(eo: &[u8; 11]) -> u8 {
    let sum: u32 = eo.iter().map(|&v| u32::from(v)).sum();
    ((2 - sum % 2) % 2) as u8
}

/// Complete the transmitted arrays and render the facelet string.
pub fn reconstruct(
    cp: &[u8; 7],
    co: &[u8; 7],
    ep: &[u8; 11],
    eo: &[u8; 11],
) -> Result<(String, CubeState), FaceletError> {
    let mut full_cp = [0i32; 8];
    for (dst, &src) in full_cp.iter_mut().zip(cp) {
        *dst = i32::from(src);
    }
    full_cp[7] = corner_permutation_checksum(cp);

    let mut full_ep = [0i32; 12];
    for (dst, &src) in full_ep.iter_mut().zip(ep) {
        *dst = i32::from(src);
    }
    full_ep[11] = edge_permutation_checksum(ep);

    let mut full_co = [0u8; 8];
    full_co[..7].copy_from_slice(co);
    full_co[7] = corner_orientation_checksum(co);

    let mut full_eo = [0u8; 12];
    full_eo[..11].copy_from_slice(eo);
    full_eo[11] = edge_orientation_checksum(eo);

    if full_cp.iter().any(|&v| !(0..8).contains(&v)) {
        return Err(FaceletError::CornerPermutation(full_cp));
    }
    if full_co.iter().any(|&v| v > 2) {
        return Err(FaceletError::CornerOrientation(full_co));
    }
    if full_ep.iter().any(|&v| !(0..12).contains(&v)) {
        return Err(FaceletError::EdgePermutation(full_ep));
    }
    if full_eo.iter().any(|&v| v > 1) {
        return Err(FaceletError::EdgeOrientation(full_eo));
    }

    let state = CubeState {
        cp: full_cp.map(|v| v as u8),
        co: full_co,
        ep: full_ep.map(|v| v as u8),
        eo: full_eo,
    };
    Ok((to_facelets(&state), state))
}

/// Render a complete cube state as a URFDLB facelet string.
pub fn to_facelets(state: &CubeState) -> String {
    let mut facelets: [char; 54] = std::array::from_fn(|i| FACES[i / 9]);

    for (slot, stickers) in CORNER_FACELET_MAP.iter().enumerate() {
        let piece = &CORNER_FACELET_MAP[state.cp[slot] as usize];
        let twist = state.co[slot] as usize;
        for p in 0..3 {
            facelets[stickers[(p + twist) % 3]] = FACES[piece[p] / 9];
        }
    }

    for (slot, stickers) in EDGE_FACELET_MAP.iter().enumerate() {
        let piece = &EDGE_FACELET_MAP[state.ep[slot] as usize];
        let flip = state.eo[slot] as usize;
        for p in 0..2 {
            facelets[stickers[(p + flip) % 2]] = FACES[piece[p] / 9];
        }
    }

    facelets.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_solved_state() {
        let (facelets, state) = reconstruct(
            &[0, 1, 2, 3, 4, 5, 6],
            &[0; 7],
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            &[0; 11],
        )
        .unwrap();
        assert_eq!(facelets, SOLVED_FACELETS);
        assert_eq!(state, CubeState::solved());
    }

    #[test]
    fn test_single_r_turn() {
        // R: URF <- DFR <- DRB <- UBR <- URF, corners twisted; UR <- FR <- DR <- BR
        let state = CubeState {
            cp: [4, 1, 2, 0, 7, 5, 6, 3],
            co: [2, 0, 0, 1, 1, 0, 0, 2],
            ep: [8, 1, 2, 3, 11, 5, 6, 7, 4, 9, 10, 0],
            eo: [0; 12],
        };
        assert_eq!(
            to_facelets(&state),
            "UUFUUFUUFRRRRRRRRRFFDFFDFFDDDBDDBDDBLLLLLLLLLUBBUBBUBB"
        );
    }

    #[test]
    fn test_invalid_permutation_rejected() {
        let result = reconstruct(&[7; 7], &[0; 7], &[0; 11], &[0; 11]);
        assert!(matches!(result, Err(FaceletError::CornerPermutation(_))));

        let result = reconstruct(
            &[0, 1, 2, 3, 4, 5, 6],
            &[0; 7],
            &[15, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            &[0; 11],
        );
        assert!(matches!(result, Err(FaceletError::EdgePermutation(_))));
    }

    #[test]
    fn test_orientation_out_of_range_rejected() {
        let result = reconstruct(
            &[0, 1, 2, 3, 4, 5, 6],
            &[3, 0, 0, 0, 0, 0, 0],
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            &[0; 11],
        );
        assert!(matches!(result, Err(FaceletError::CornerOrientation(_))));
    }

    proptest! {
        #[test]
        fn test_checksums_complete_the_invariants(
            cp in prop::array::uniform7(0u8..8),
            co in prop::array::uniform7(0u8..3),
            ep in prop::array::uniform11(0u8..12),
            eo in prop::array::uniform11(0u8..2),
        ) {
            let cp_sum: i32 = cp.iter().map(|&v| i32::from(v)).sum();
            prop_assert_eq!(cp_sum + corner_permutation_checksum(&cp), 28);

            let co_sum: u32 = co.iter().map(|&v| u32::from(v)).sum();
            let co_last = corner_orientation_checksum(&co);
            prop_assert!(co_last < 3);
            prop_assert_eq!((co_sum + u32::from(co_last)) % 3, 0);

            let ep_sum: i32 = ep.iter().map(|&v| i32::from(v)).sum();
            prop_assert_eq!(ep_sum + edge_permutation_checksum(&ep), 66);

            let eo_sum: u32 = eo.iter().map(|&v| u32::from(v)).sum();
            let eo_last = edge_orientation_checksum(&eo);
            prop_assert!(eo_last < 2);
            prop_assert_eq!((eo_sum + u32::from(eo_last)) % 2, 0);
        }
    }
}
