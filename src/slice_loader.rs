use crate::{enums::SortBy, volume::SliceRecord, volume::VolumeField};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, s};
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SliceLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// Slices of one series in stacking order plus the physical voxel size.
#[derive(Clone, Debug)]
pub struct LoadedSeries {
    pub slices: Vec<SliceRecord>,
    /// `(column spacing, row spacing, slice thickness)`, defaulting to 1.0.
    pub spacing: (f32, f32, f32),
}

impl LoadedSeries {
    pub fn into_volume_field(self) -> crate::Result<VolumeField> {
        Ok(VolumeField::from_slices(&self.slices)?.with_spacing(self.spacing))
    }
}

/// Per-slice attributes read before the pixel data is decoded.
#[derive(Clone, Debug, PartialEq)]
struct SliceMetadata {
    series_uid: Option<String>,
    order: f32,
    rescale_slope: f32,
    rescale_intercept: f32,
    spacing: Option<(f32, f32, f32)>,
}

pub struct SliceLoader;

impl SliceLoader {
    /// Load the first series found in `dicom_objects`.
    ///
    /// Stored values are read without modality or VOI LUT; the rescale pair
    /// travels with each [`SliceRecord`]. Slices are sorted ascending by
    /// `sort_by`, objects lacking the key or decodable pixel data are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<LoadedSeries, SliceLoaderError> {
        let candidates: Vec<_> = dicom_objects
            .iter()
            .enumerate()
            .filter_map(|(index, dicom_object)| {
                let Some(metadata) = Self::read_metadata(dicom_object, sort_by, index) else {
                    log::warn!("Skipping object {index}: missing {sort_by:?} key");
                    return None;
                };
                let Some(image) = Self::decode_image(dicom_object) else {
                    log::warn!("Skipping object {index}: pixel data could not be decoded");
                    return None;
                };
                Some((metadata, image))
            })
            .collect();

        let mut images = Self::select_first_series(candidates);
        if images.is_empty() {
            return Err(SliceLoaderError::NoValidImages);
        }
        Self::sort_images(&mut images, sort_by);
        Self::validate_dimensions(&images)?;

        let slices = images
            .iter()
            .map(|(metadata, image)| {
                let (height, width) = image.dim();
                SliceRecord::new(width as u32, height as u32, image.iter().copied().collect())
                    .with_rescale(metadata.rescale_slope, metadata.rescale_intercept)
            })
            .collect::<Vec<_>>();
        let spacing = Self::get_spacing(&images).unwrap_or_else(|| {
            log::warn!("No pixel spacing or slice thickness, assuming unit spacing");
            (1.0, 1.0, 1.0)
        });
        log::info!("Loaded {} slices, spacing {:?}", slices.len(), spacing);

        Ok(LoadedSeries { slices, spacing })
    }

    /// Load a series from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<LoadedSeries, SliceLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a series from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<LoadedSeries, SliceLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(SliceLoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    fn read_metadata(
        dicom_object: &InMemDicomObject,
        sort_by: SortBy,
        index: usize,
    ) -> Option<SliceMetadata> {
        let order = match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                *pos.get(2)?
            }
            SortBy::SliceLocation => dicom_object
                .element(tags::SLICE_LOCATION)
                .ok()?
                .to_float32()
                .ok()?,
            SortBy::InstanceNumber => dicom_object
                .element(tags::INSTANCE_NUMBER)
                .ok()?
                .to_int::<i32>()
                .ok()? as f32,
            SortBy::None => index as f32,
        };
        let float_or = |tag: dicom::core::Tag, default: f32| {
            dicom_object
                .element(tag)
                .ok()
                .and_then(|element| element.to_float32().ok())
                .filter(|value| value.is_finite())
                .unwrap_or(default)
        };
        let series_uid = dicom_object
            .element(tags::SERIES_INSTANCE_UID)
            .ok()
            .and_then(|element| element.to_str().ok())
            .map(|uid| uid.trim_end_matches(['\0', ' ']).to_string());

        Some(SliceMetadata {
            series_uid,
            order,
            rescale_slope: float_or(tags::RESCALE_SLOPE, 1.0),
            rescale_intercept: float_or(tags::RESCALE_INTERCEPT, 0.0),
            spacing: Self::read_spacing(dicom_object),
        })
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    /// Keep only the slices belonging to the first series encountered.
    fn select_first_series<T>(candidates: Vec<(SliceMetadata, T)>) -> Vec<(SliceMetadata, T)> {
        let Some(first) = candidates.first().map(|(metadata, _)| metadata.series_uid.clone())
        else {
            return candidates;
        };
        let total = candidates.len();
        let selected: Vec<_> = candidates
            .into_iter()
            .filter(|(metadata, _)| metadata.series_uid == first)
            .collect();
        if selected.len() < total {
            log::warn!(
                "Skipped {} slices from other series than {:?}",
                total - selected.len(),
                first
            );
        }
        selected
    }

    fn sort_images<T>(images: &mut [(SliceMetadata, T)], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            images.sort_by(|a, b| a.0.order.total_cmp(&b.0.order));
        }
    }

    fn validate_dimensions(
        images: &[(SliceMetadata, Array2<f32>)],
    ) -> Result<(), SliceLoaderError> {
        let first_dim = images[0].1.dim();
        if images.iter().any(|(_, img)| img.dim() != first_dim) {
            return Err(SliceLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    /// Spacing of the first selected slice that carries both attributes.
    fn get_spacing<T>(images: &[(SliceMetadata, T)]) -> Option<(f32, f32, f32)> {
        images.iter().find_map(|(metadata, _)| metadata.spacing)
    }

    fn read_spacing(dicom_object: &InMemDicomObject) -> Option<(f32, f32, f32)> {
        let pixel_spacing = dicom_object
            .element(tags::PIXEL_SPACING)
            .ok()?
            .to_multi_float32()
            .ok()?;

        let slice_thickness = dicom_object
            .element(tags::SLICE_THICKNESS)
            .ok()?
            .to_float32()
            .ok()?;

        // Pixel Spacing is (row spacing, column spacing).
        Some((*pixel_spacing.get(1)?, *pixel_spacing.first()?, slice_thickness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR, dicom_value};

    fn object(elements: Vec<DataElement<InMemDicomObject>>) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(elements)
    }

    fn metadata(series: &str, order: f32) -> SliceMetadata {
        SliceMetadata {
            series_uid: Some(series.to_string()),
            order,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            spacing: None,
        }
    }

    #[test]
    fn reads_rescale_with_defaults() {
        let with_rescale = object(vec![
            DataElement::new(tags::SLICE_LOCATION, VR::DS, PrimitiveValue::from(12.5f32)),
            DataElement::new(tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from(2.0f32)),
            DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from(-1024.0f32)),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3\0")),
        ]);
        let metadata = SliceLoader::read_metadata(&with_rescale, SortBy::SliceLocation, 0).unwrap();
        assert_eq!(metadata.order, 12.5);
        assert_eq!(metadata.rescale_slope, 2.0);
        assert_eq!(metadata.rescale_intercept, -1024.0);
        assert_eq!(metadata.series_uid.as_deref(), Some("1.2.3"));

        let bare = object(vec![DataElement::new(
            tags::INSTANCE_NUMBER,
            VR::IS,
            PrimitiveValue::from(7i32),
        )]);
        let metadata = SliceLoader::read_metadata(&bare, SortBy::InstanceNumber, 0).unwrap();
        assert_eq!(metadata.order, 7.0);
        assert_eq!(metadata.rescale_slope, 1.0);
        assert_eq!(metadata.rescale_intercept, 0.0);
        assert_eq!(metadata.series_uid, None);
    }

    #[test]
    fn image_position_orders_by_z() {
        let positioned = object(vec![DataElement::new(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            dicom_value!(F32, [-120.0, -95.5, 33.0]),
        )]);
        let metadata =
            SliceLoader::read_metadata(&positioned, SortBy::ImagePositionPatient, 0).unwrap();
        assert_eq!(metadata.order, 33.0);
        assert!(SliceLoader::read_metadata(&positioned, SortBy::SliceLocation, 0).is_none());
        assert_eq!(
            SliceLoader::read_metadata(&positioned, SortBy::None, 4).unwrap().order,
            4.0
        );
    }

    #[test]
    fn keeps_first_series_only() {
        let candidates = vec![
            (metadata("1.1", 0.0), 'a'),
            (metadata("2.2", 1.0), 'b'),
            (metadata("1.1", 2.0), 'c'),
        ];
        let selected = SliceLoader::select_first_series(candidates);
        let tags: Vec<_> = selected.iter().map(|(_, tag)| *tag).collect();
        assert_eq!(tags, vec!['a', 'c']);
    }

    #[test]
    fn spacing_comes_from_the_selected_series() {
        let spaced = object(vec![
            DataElement::new(tags::SLICE_LOCATION, VR::DS, PrimitiveValue::from(1.0f32)),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, dicom_value!(F32, [0.5, 0.75])),
            DataElement::new(tags::SLICE_THICKNESS, VR::DS, PrimitiveValue::from(2.5f32)),
        ]);
        let read = SliceLoader::read_metadata(&spaced, SortBy::SliceLocation, 0).unwrap();
        assert_eq!(read.spacing, Some((0.75, 0.5, 2.5)));

        // The other series carries spacing, the selected one does not.
        let mut other = metadata("2.2", 0.0);
        other.spacing = Some((9.0, 9.0, 9.0));
        let mut late = metadata("1.1", 3.0);
        late.spacing = Some((0.5, 0.5, 1.0));
        let candidates = vec![(metadata("1.1", 1.0), ()), (other, ()), (late, ())];
        let selected = SliceLoader::select_first_series(candidates);
        assert_eq!(SliceLoader::get_spacing(&selected), Some((0.5, 0.5, 1.0)));

        let unspaced = vec![(metadata("1.1", 0.0), ())];
        assert_eq!(SliceLoader::get_spacing(&unspaced), None);
    }

    #[test]
    fn sorts_ascending_unless_unordered() {
        let mut images = vec![
            (metadata("1", 3.0), 0),
            (metadata("1", -1.0), 1),
            (metadata("1", 2.0), 2),
        ];
        SliceLoader::sort_images(&mut images, SortBy::SliceLocation);
        let order: Vec<_> = images.iter().map(|(_, i)| *i).collect();
        assert_eq!(order, vec![1, 2, 0]);

        let mut untouched = vec![(metadata("1", 3.0), 0), (metadata("1", -1.0), 1)];
        SliceLoader::sort_images(&mut untouched, SortBy::None);
        assert_eq!(untouched[0].1, 0);
    }

    #[test]
    fn rejects_mixed_slice_sizes() {
        let images = vec![
            (metadata("1", 0.0), Array2::<f32>::zeros((4, 4))),
            (metadata("1", 1.0), Array2::<f32>::zeros((4, 5))),
        ];
        assert!(matches!(
            SliceLoader::validate_dimensions(&images),
            Err(SliceLoaderError::InconsistentDimensions)
        ));
    }

    #[test]
    fn empty_directory_has_no_images() {
        let dir = std::env::temp_dir().join("dicom-raymarch-empty-series");
        fs::create_dir_all(&dir).unwrap();
        assert!(matches!(
            SliceLoader::load_from_directory(&dir, SortBy::default()),
            Err(SliceLoaderError::NoValidImages)
        ));
    }
}
