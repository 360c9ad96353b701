use client::UploadParams;

pub async fn upload(params: UploadParams) -> anyhow::Result<()> {
    let file = params.file.display().to_string();
    let reply = client::upload_photo(params).await?;
    println!("{file} uploaded as {}", reply.data.filename);
    println!("Id        : {}", reply.data.id);
    println!("URL       : {}", reply.data.url);
    if let Some(thumbnail) = reply.data.thumbnail {
        println!("Thumbnail : {thumbnail}");
    }
    Ok(())
}

pub async fn gallery(uri: &str, page: usize) -> anyhow::Result<()> {
    let page = client::gallery(uri, page).await?;
    println!("{}", client::render_gallery(&page));
    println!(
        "page {} of {}, {} photos",
        page.page, page.total_pages, page.total_photos
    );
    Ok(())
}

pub async fn delete(uri: &str, id: &str, admin_password: &str) -> anyhow::Result<()> {
    let result = client::delete_photo(uri, id, admin_password).await?;
    println!("photo {} deleted", result.id);
    Ok(())
}

pub async fn clear(uri: &str, admin_password: &str) -> anyhow::Result<()> {
    let result = client::clear_gallery(uri, admin_password).await?;
    println!("gallery cleared, {} files removed", result.files);
    Ok(())
}
