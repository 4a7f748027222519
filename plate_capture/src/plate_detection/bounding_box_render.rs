use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::{CandidateRegion, Frame};

const PLATE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const THICKNESS_PX: u32 = 2;

/// Draws a green box around `region` on the frame itself.
pub fn mark_plate(frame: &mut Frame, region: &CandidateRegion) {
    for inset in 0..THICKNESS_PX {
        let width = region.width.saturating_sub(2 * inset);
        let height = region.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32)
            .of_size(width, height);
        draw_hollow_rect_mut(&mut frame.pixels, rect, PLATE_COLOR);
    }
}
